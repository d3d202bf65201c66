pub mod api;
pub mod config;
pub mod db;
pub mod ingest;
pub mod push;
pub mod sink;
pub mod source;

#[cfg(test)]
mod test_support;
