#![forbid(unsafe_code)]

pub mod bindings;
pub mod broadcaster;
pub mod health;
pub mod history;
pub mod presence;
pub mod registry;
pub mod session;




#[cfg(test)]
mod presence_tests;

#[cfg(test)]
mod registry_tests;
