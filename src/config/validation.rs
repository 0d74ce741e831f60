//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check identity uniqueness (account IDs, node IDs across accounts)
//! - Validate node URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FailoverConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::config::schema::FailoverConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("account with empty id")]
    EmptyAccountId,

    #[error("duplicate account id '{0}'")]
    DuplicateAccount(String),

    #[error("node with empty id in account '{0}'")]
    EmptyNodeId(String),

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("node '{node}' has invalid url '{url}'")]
    InvalidUrl { node: String, url: String },
}

pub fn validate_config(config: &FailoverConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut accounts = HashSet::new();
    let mut nodes = HashSet::new();

    for account in &config.accounts {
        if account.id.is_empty() {
            errors.push(ValidationError::EmptyAccountId);
        } else if !accounts.insert(account.id.as_str()) {
            errors.push(ValidationError::DuplicateAccount(account.id.clone()));
        }

        for node in &account.nodes {
            if node.id.is_empty() {
                errors.push(ValidationError::EmptyNodeId(account.id.clone()));
            } else if !nodes.insert(node.id.as_str()) {
                errors.push(ValidationError::DuplicateNode(node.id.clone()));
            }
            if Url::parse(&node.url).is_err() {
                errors.push(ValidationError::InvalidUrl {
                    node: node.id.clone(),
                    url: node.url.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
