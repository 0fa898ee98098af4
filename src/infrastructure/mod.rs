pub mod directions;
pub mod hud_link;
pub mod location;
pub mod logging;
pub mod retry;
