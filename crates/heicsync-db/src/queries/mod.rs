//! Database query modules.
//!
//! - jobs: conversion job lifecycle, listing, and aggregate statistics

pub mod jobs;
