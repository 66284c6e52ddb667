pub mod profile_examples;
