pub mod toolservice;
