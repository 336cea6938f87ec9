pub mod compression;
pub mod constants;
mod framing;
mod handshake;
mod messaging;
mod packet;

pub use self::{framing::*, handshake::*, messaging::*, packet::*};
