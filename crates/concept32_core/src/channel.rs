/*
    Concept32
    https://github.com/dbalsom/concept32

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    channel.rs

    The I/O channel contract consumed by channel-attached device models.

    The channel program interpreter itself lives with the CPU; devices only
    move bytes through it one at a time and post ending status. The status
    byte uses the IBM-style bit assignments the SEL channel reports.
*/

/// A channel/subaddress pair, packed the way the channel firmware passes it
/// around: channel number in the high byte, subaddress in the low byte.
pub type Chsa = u16;

// Device status flags presented with channel-end/device-end.
pub const STA_ATTENTION: u8 = 0x80; /* Unit attention */
pub const STA_STATUS_MOD: u8 = 0x40; /* Status modifier */
pub const STA_CTL_END: u8 = 0x20; /* Control unit end */
pub const STA_BUSY: u8 = 0x10; /* Unit busy */
pub const STA_CHAN_END: u8 = 0x08; /* Channel end */
pub const STA_DEV_END: u8 = 0x04; /* Device end */
pub const STA_UNIT_CHECK: u8 = 0x02; /* Unit check */
pub const STA_UNIT_EXCEPTION: u8 = 0x01; /* Unit exception */

/// Byte-level transfer interface between a device and its channel program.
///
/// A device never sees the IOCD list; it pulls output data with
/// [`read_byte`](ChannelIo::read_byte), pushes input data with
/// [`write_byte`](ChannelIo::write_byte), and finishes with
/// [`chan_end`](ChannelIo::chan_end). Asynchronous completions (seek
/// device-end, attach attention) go through
/// [`set_devattn`](ChannelIo::set_devattn).
pub trait ChannelIo {
    /// Take the next data byte of the current channel program.
    /// `None` means the transfer count is exhausted.
    fn read_byte(&mut self, chsa: Chsa) -> Option<u8>;

    /// Hand a data byte to the current channel program. Returns `false`
    /// when the transfer is satisfied and the byte was not accepted.
    fn write_byte(&mut self, chsa: Chsa, data: u8) -> bool;

    /// True when the channel will move no more data for this operation.
    fn transfer_exhausted(&self, chsa: Chsa) -> bool;

    /// Post ending status for the current operation.
    fn chan_end(&mut self, chsa: Chsa, status: u8);

    /// Post asynchronous status for a unit with no operation in flight.
    fn set_devattn(&mut self, chsa: Chsa, status: u8);
}

#[cfg(test)]
pub(crate) mod mock {
    //! A scripted channel used by the device state machine tests. Output
    //! data and acceptance limits are fixed up front; everything the
    //! device does is recorded for assertion.

    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct ScriptedChannel {
        /// Bytes the channel program supplies to the device (writes, seek
        /// payloads, INCH parameter blocks).
        pub outbound: VecDeque<u8>,
        /// Bytes the device stored into memory.
        pub inbound: Vec<u8>,
        /// How many more inbound bytes the channel will accept.
        pub accept: usize,
        /// Ending status posted via chan_end, in order.
        pub endings: Vec<(Chsa, u8)>,
        /// Status posted via set_devattn, in order.
        pub attentions: Vec<(Chsa, u8)>,
    }

    impl ScriptedChannel {
        pub fn new() -> Self {
            Default::default()
        }

        pub fn with_accept(accept: usize) -> Self {
            ScriptedChannel {
                accept,
                ..Default::default()
            }
        }

        pub fn supplying(bytes: &[u8]) -> Self {
            ScriptedChannel {
                outbound: bytes.iter().copied().collect(),
                ..Default::default()
            }
        }

        pub fn last_ending(&self) -> Option<u8> {
            self.endings.last().map(|&(_, status)| status)
        }
    }

    impl ChannelIo for ScriptedChannel {
        fn read_byte(&mut self, _chsa: Chsa) -> Option<u8> {
            self.outbound.pop_front()
        }

        fn write_byte(&mut self, _chsa: Chsa, data: u8) -> bool {
            if self.accept == 0 {
                return false;
            }
            self.accept -= 1;
            self.inbound.push(data);
            true
        }

        fn transfer_exhausted(&self, _chsa: Chsa) -> bool {
            self.outbound.is_empty() && self.accept == 0
        }

        fn chan_end(&mut self, chsa: Chsa, status: u8) {
            self.endings.push((chsa, status));
        }

        fn set_devattn(&mut self, chsa: Chsa, status: u8) {
            self.attentions.push((chsa, status));
        }
    }
}
