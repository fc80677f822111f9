pub mod client;
pub mod verdict;
