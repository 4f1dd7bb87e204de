pub mod agents;
pub mod app;
pub mod checksum;
pub mod config;
pub mod convert;
pub mod dataset;
pub mod ddi;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod layout;
pub mod mets;
pub mod output;
pub mod reconcile;
pub mod records;
