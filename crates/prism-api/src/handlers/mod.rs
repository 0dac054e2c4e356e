pub mod actions;
pub mod feed;
pub mod health;
pub mod platforms;
pub mod webhooks;
pub mod websocket;
