pub mod listen;
pub mod push;
pub mod serve;
