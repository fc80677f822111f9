pub mod abi;
pub mod service;
pub mod thor;
pub mod transaction;
