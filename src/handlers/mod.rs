pub mod access;
pub mod commands;
pub mod headshot;
pub mod media;
