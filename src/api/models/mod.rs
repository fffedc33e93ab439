pub mod subtitle;
