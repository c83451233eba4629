//! Public-API test binary: argument validation and property-based
//! invariants.

mod property_tests;
mod validation_tests;
