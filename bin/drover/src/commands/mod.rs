pub mod onboard;
pub mod run;
pub mod sessions;
pub mod status;
pub mod stop;
