//! End-to-end tests at the HTTP request/response level.
//!
//! Each test runs one or more service instances over a shared in-memory
//! store, with the watch task running, and drives them through the router.

#![cfg(test)]

mod helpers;

mod test_convergence;
mod test_data;
mod test_missing_fields;
mod test_refresh;
mod test_rule_admin;
mod test_schemes;
mod test_sign_verify;
