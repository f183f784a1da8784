//! Hierarchical organization core: org tree with a closure index, caller
//! scope resolution and permission-template provisioning.

pub mod config;
pub mod db;
pub mod models;
pub mod services;

pub use services::{OrgCore, OrgError, Scope};
