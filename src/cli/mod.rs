pub mod headshot;
