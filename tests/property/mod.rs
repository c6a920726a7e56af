//! Property-based tests for expansion, seeding and compliance guarantees

mod compliance;
mod expansion;
mod seeding;
