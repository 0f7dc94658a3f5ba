#![doc = include_str!("../README.md")]

mod pool;
mod service;
mod thread;

pub use crate::{
    pool::{Builder, ThreadPool},
    service::{Service, Work},
    thread::{default_threads, Priority},
};
