pub mod arg_parser;
pub mod errors;
pub mod sampler;
pub mod sink;
