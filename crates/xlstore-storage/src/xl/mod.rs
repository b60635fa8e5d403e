pub mod posix;
pub mod storage;
