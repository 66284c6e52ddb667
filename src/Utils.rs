/// terminal logging for the binary and the examples
pub mod logger;
