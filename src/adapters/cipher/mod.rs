pub mod age_provider;
