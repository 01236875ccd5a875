mod common;
mod routing;
mod sessions;
