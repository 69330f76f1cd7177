//! Scripted network used by unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::http::{Request, Response};
use crate::network::Fetcher;

#[derive(Clone)]
enum Reply {
  Respond(Response),
  Fail,
  Hang,
}

/// Fetcher that answers from a table of per-URL replies and counts calls.
///
/// Unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct ScriptedNetwork {
  replies: Mutex<HashMap<String, Reply>>,
  calls: AtomicUsize,
  posts: Mutex<Vec<(String, serde_json::Value)>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn reply(&self, url: &str, status: u16, body: &str) {
    self.set(url, Reply::Respond(Response::new(status, body.to_string())));
  }

  pub fn fail(&self, url: &str) {
    self.set(url, Reply::Fail);
  }

  /// Never resolve, like a request that is still pending.
  pub fn hang(&self, url: &str) {
    self.set(url, Reply::Hang);
  }

  /// Number of `fetch` and `post_json` calls so far.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// Bodies sent through `post_json`, in order.
  pub fn posts(&self) -> Vec<(String, serde_json::Value)> {
    self.posts.lock().unwrap().clone()
  }

  fn set(&self, url: &str, reply: Reply) {
    self.replies.lock().unwrap().insert(url.to_string(), reply);
  }

  async fn answer(&self, url: &Url) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let reply = self.replies.lock().unwrap().get(url.as_str()).cloned();

    match reply {
      Some(Reply::Respond(response)) => Ok(response),
      Some(Reply::Hang) => std::future::pending().await,
      Some(Reply::Fail) | None => Err(eyre!("network unreachable: {}", url)),
    }
  }
}

#[async_trait]
impl Fetcher for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.answer(&request.url).await
  }

  async fn post_json(&self, url: &Url, body: &serde_json::Value) -> Result<Response> {
    let response = self.answer(url).await;
    if response.is_ok() {
      self.posts.lock().unwrap().push((url.to_string(), body.clone()));
    }
    response
  }
}
