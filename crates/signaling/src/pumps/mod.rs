//! Background tasks that own the relay socket.

pub(crate) mod read;
pub(crate) mod write;
