//! Source-system importers: clients, transforms and step tables

pub mod jira;
