//! Cancellable image byte downloads.

use tokio::sync::oneshot;

use crate::error::FetchError;

use super::api_types;

/// Spawns independently cancellable byte downloads.
///
/// The fetcher knows nothing about the cache or the store; it turns a URL
/// into bytes, once, and can be told to stop.
#[derive(Debug, Clone, Default)]
pub struct ImageFetcher {
  http: reqwest::Client,
}

impl ImageFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a fetcher on an existing connection pool.
  pub fn with_client(http: reqwest::Client) -> Self {
    Self { http }
  }

  /// Start downloading the image at `url`.
  ///
  /// The download runs on a spawned task; the returned handle is the only
  /// way to observe it. Dropping the handle cancels the download.
  pub fn fetch(&self, url: &str) -> FetchTask {
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let (result_tx, result_rx) = oneshot::channel();

    let http = self.http.clone();
    let url = url.to_string();

    tokio::spawn(async move {
      tokio::select! {
        // Fires on explicit cancel and when the handle is dropped.
        _ = cancel_rx => {
          let _ = result_tx.send(Err(FetchError::Cancelled));
        }
        result = download(http, url) => {
          let _ = result_tx.send(result);
        }
      }
    });

    FetchTask {
      cancel_tx: Some(cancel_tx),
      result_rx,
    }
  }
}

async fn download(http: reqwest::Client, url: String) -> Result<Vec<u8>, FetchError> {
  let response = http.get(url).send().await?;

  // Same enrichment as the search client: a failed response with a parseable
  // status message beats a bare HTTP status error.
  let status_err = response.error_for_status_ref().err();
  if let Some(status_err) = status_err {
    let body = response.bytes().await.unwrap_or_default();
    return Err(match api_types::error_message_from_body(&body) {
      Some(message) => FetchError::Remote(message),
      None => FetchError::Transport(status_err),
    });
  }

  Ok(response.bytes().await?.to_vec())
}

/// Handle to one in-flight download.
///
/// Once `cancel` has been called, the task can only ever resolve to
/// `FetchError::Cancelled` - never to a byte payload.
#[derive(Debug)]
pub struct FetchTask {
  cancel_tx: Option<oneshot::Sender<()>>,
  result_rx: oneshot::Receiver<Result<Vec<u8>, FetchError>>,
}

impl FetchTask {
  /// Abort the download. Harmless if the task already finished or was
  /// already cancelled.
  pub fn cancel(&mut self) {
    if let Some(cancel_tx) = self.cancel_tx.take() {
      let _ = cancel_tx.send(());
    }
  }

  /// Wait for the download to finish.
  pub async fn join(self) -> Result<Vec<u8>, FetchError> {
    match self.result_rx.await {
      Ok(result) => result,
      // The runtime tore the task down before it could report.
      Err(_) => Err(FetchError::Cancelled),
    }
  }
}

/// One logical display slot's in-flight download.
///
/// A recycled slot (a list cell being reassigned to a different photo) must
/// not let a stale download complete into the new occupant: assigning a new
/// task cancels and replaces the previous one atomically.
#[derive(Debug, Default)]
pub struct ImageSlot {
  task: Option<FetchTask>,
}

impl ImageSlot {
  pub fn new() -> Self {
    Self::default()
  }

  /// Install a new download, cancelling whatever was in flight.
  pub fn assign(&mut self, task: FetchTask) {
    if let Some(mut previous) = self.task.replace(task) {
      previous.cancel();
    }
  }

  /// Take the current task to await it, leaving the slot empty.
  pub fn take(&mut self) -> Option<FetchTask> {
    self.task.take()
  }

  /// Cancel and drop whatever is in flight.
  pub fn clear(&mut self) {
    if let Some(mut previous) = self.task.take() {
      previous.cancel();
    }
  }
}
