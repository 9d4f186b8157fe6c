pub mod catalog_store;
pub mod recommendation_client;
