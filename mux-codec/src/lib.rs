//! NMEA-0183 and Seatalk-1 codecs, the canonical [`message::Message`] type
//! exchanged between devices, and the transport interface devices read
//! from and write to.

pub mod message;
pub mod nmea;
pub mod seatalk;
pub mod transport;

pub mod prelude {
    pub use crate::message::{Message, SpeedUnit};
    pub use crate::nmea;
    pub use crate::seatalk;
    pub use crate::transport::{Parity, Transport, TransportError};
}
