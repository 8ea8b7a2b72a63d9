// Life of a request:
// 1. JSON comes in over HTTP and passes the shared-secret check
// 2. The handler looks the rule up in the registry
// 3. The rule's authorizer (and updater) codec signs or verifies
// 4. JSON goes out
//
// Life of a rule change:
// 1. An admin request writes the store
// 2. Every instance's watch task sees the write
// 3. The rule is rebuilt and swapped into that instance's registry
//
// System components:
//  - Codecs (HS256, RS256, SM2, SM4)
//  - Rule registry
//  - Store adapter and watch task
//  - HTTP layer

#![cfg_attr(test, allow(clippy::disallowed_methods, clippy::expect_used))]

pub mod authority;
pub mod codec;
pub mod config;
pub mod http;
pub mod registry;
pub mod rule;
pub mod store;
pub mod telemetry;

mod e2e_tests;

pub use authority::{AuthError, Authority, IssuedTokens};
pub use registry::RuleRegistry;
pub use rule::{Rule, RuleDefinition};
