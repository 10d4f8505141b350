pub mod notification_listener;
