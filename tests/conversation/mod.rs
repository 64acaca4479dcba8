//! Conversation module tests.

mod chat_test;
