pub mod api;
pub mod connector;
pub mod domain;
pub mod reconcile;
pub mod session;
pub mod suppliers;
#[cfg(test)]
pub(crate) mod testing;
pub mod transform;

pub mod util {
    pub mod db;
    pub mod env;
    pub mod retry;
}
