pub mod canvas;
pub mod config;
pub mod db;
pub mod frame;
pub mod routes;
pub mod services;
pub mod state;
