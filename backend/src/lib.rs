pub mod auth;
pub mod db;
pub mod detect;
pub mod routes;
