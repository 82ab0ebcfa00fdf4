// Route modules for the Chatline server
pub mod conversations; // Conversation listing, creation, read markers
pub mod websocket; // Chat event stream upgrade
