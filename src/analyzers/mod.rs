// src/analyzers/mod.rs
//
// Per-signal scoring rules. Each analyzer is a pure function of
// (signal, thresholds): starts at 100, applies its rule table in a fixed
// order, appends at most one flag per rule, and maps the clamped score to a
// status or environment kind. Determinism of the verdict rests on this
// ordering.

pub mod environment;
pub mod location;
