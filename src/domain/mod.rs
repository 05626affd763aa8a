pub mod catalog;
pub mod classifier;
pub mod invoker;
pub mod monitor;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
