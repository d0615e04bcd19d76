pub mod packet;
pub mod protocol;
