pub mod call;

pub use call::ModelCall;
