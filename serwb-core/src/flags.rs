//! Physical-layer status bits and trainer side effects.

use bitflags::bitflags;

bitflags! {
    /// Status bits exchanged with the physical transport, sampled once per
    /// line clock.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PhyStatus: u8 {
        /// The receiver sees electrical idle.
        const RX_IDLE         = 0b0000_0001;
        /// A comma was recognised at the current alignment offset.
        const RX_COMMA        = 0b0000_0010;
        /// The aligner asked the deserializer to slip by one bit.
        const BITSLIP_REQUEST = 0b0000_0100;
        /// Input delay calibration requested.
        const DELAY_CALIBRATE = 0b0000_1000;
        /// The current word failed to decode.
        const DECODE_ERROR    = 0b0001_0000;
        /// The transmitter drives electrical idle.
        const TX_IDLE         = 0b0010_0000;
        /// The transmitter drives comma fill.
        const TX_COMMA        = 0b0100_0000;
    }
}

bitflags! {
    /// One-shot side effects requested by a trainer transition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TrainerActions: u8 {
        /// Clear codec, scrambler and framing state.
        const RESET_DATAPATH  = 0b0001;
        /// Restart the bit aligner from offset 0.
        const RESTART_ALIGNER = 0b0010;
        /// Ask the transport to recalibrate its input delay.
        const DELAY_CALIBRATE = 0b0100;
        /// Switch the transmitter to scrambled payload.
        const ENABLE_PAYLOAD  = 0b1000;
    }
}
