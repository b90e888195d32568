pub mod gate;
pub mod mem;
pub mod sorted;
pub mod window;
