use crate::{Error, PageContext, Result, Session, Viewport};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use tokio::sync::oneshot;

type PageId = u64;

enum Command {
    NewPage(oneshot::Sender<Result<PageId>>),
    SetViewport(PageId, Viewport, oneshot::Sender<Result<()>>),
    Goto(PageId, String, oneshot::Sender<Result<()>>),
    Screenshot(PageId, Option<PathBuf>, bool, oneshot::Sender<Result<Vec<u8>>>),
    ClosePage(PageId, oneshot::Sender<Result<()>>),

    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly browser abstraction backed by a dedicated worker thread.
///
/// The worker thread owns the [`Session`] and executes commands sent from
/// async tasks, so callers get an async interface without the session having
/// to be `Send`. Dropping the last handle stops the worker, which drops the
/// session.
#[derive(Clone)]
pub struct Browser {
    cmd_tx: Sender<Command>,
}

/// A handle representing one page context in the browser.
pub struct Page {
    id: PageId,
    cmd_tx: Sender<Command>,
}

impl Browser {
    /// Launch a headless Chrome session (spawns a background thread that owns it).
    #[cfg(feature = "cdp")]
    pub async fn new(config: Option<crate::BrowserConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();
        Self::launch(move || crate::cdp::CdpSession::launch(config)).await
    }

    /// Spawn a worker thread, build the session on it with `factory`, and
    /// return once the session is up (or report why it failed).
    pub async fn launch<S, F>(factory: F) -> Result<Self>
    where
        S: Session + 'static,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx): (oneshot::Sender<Result<()>>, oneshot::Receiver<Result<()>>) =
            oneshot::channel();

        thread::spawn(move || {
            let session = match factory() {
                Ok(s) => s,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };

            let _ = init_tx.send(Ok(()));
            serve(session, cmd_rx);
        });

        // Wait for the worker to report initialization success or failure
        let init_res = init_rx
            .await
            .map_err(|e| Error::LaunchError(format!("Worker init canceled: {}", e)))?;
        init_res?;

        Ok(Self { cmd_tx })
    }

    /// Open a new page context in the session.
    pub async fn new_page(&self) -> Result<Page> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::NewPage(tx));
        let id = rx
            .await
            .map_err(|e| Error::Other(format!("NewPage canceled: {}", e)))??;
        Ok(Page {
            id,
            cmd_tx: self.cmd_tx.clone(),
        })
    }

    /// Shutdown the background worker and close the browser.
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Close(tx));
        rx.await
            .map_err(|e| Error::Other(format!("Close canceled: {}", e)))?
    }
}

/// Command loop run on the worker thread. Pages stay keyed by id until closed.
fn serve<S: Session>(mut session: S, cmd_rx: Receiver<Command>) {
    let mut pages: HashMap<PageId, S::Page> = HashMap::new();
    let mut next_id: PageId = 0;

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            Command::NewPage(resp) => {
                let res = session.new_page().map(|page| {
                    next_id += 1;
                    pages.insert(next_id, page);
                    next_id
                });
                let _ = resp.send(res);
            }
            Command::SetViewport(id, viewport, resp) => {
                let res = page_mut(&mut pages, id).and_then(|p| p.set_viewport(viewport));
                let _ = resp.send(res);
            }
            Command::Goto(id, url, resp) => {
                let res = page_mut(&mut pages, id).and_then(|p| p.goto(&url));
                let _ = resp.send(res);
            }
            Command::Screenshot(id, path_opt, full_page, resp) => {
                let res = page_mut(&mut pages, id)
                    .and_then(|p| p.screenshot(full_page))
                    .and_then(|data| {
                        // If a path is provided, also write to disk
                        if let Some(path) = path_opt {
                            std::fs::write(&path, &data).map_err(|e| {
                                Error::FilesystemError(format!("{}: {}", path.display(), e))
                            })?;
                        }
                        Ok(data)
                    });
                let _ = resp.send(res);
            }
            Command::ClosePage(id, resp) => {
                let res = match pages.remove(&id) {
                    Some(page) => page.close(),
                    None => Err(closed_page(id)),
                };
                let _ = resp.send(res);
            }
            Command::Close(resp) => {
                // Pages go first so their tabs are gone before the browser is
                let res = pages
                    .drain()
                    .map(|(_, page)| page.close())
                    .collect::<Result<Vec<()>>>()
                    .and(session.close());
                let _ = resp.send(res);
                return;
            }
        }
    }
}

fn page_mut<P>(pages: &mut HashMap<PageId, P>, id: PageId) -> Result<&mut P> {
    pages.get_mut(&id).ok_or_else(|| closed_page(id))
}

fn closed_page(id: PageId) -> Error {
    Error::Other(format!("page {} is already closed", id))
}

impl Page {
    /// Fix the viewport size for this page
    pub async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::SetViewport(self.id, viewport, tx));
        rx.await
            .map_err(|e| Error::Other(format!("SetViewport canceled: {}", e)))?
    }

    /// Navigate to a URL
    pub async fn goto(&self, url: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Goto(self.id, url.to_string(), tx));
        rx.await
            .map_err(|e| Error::Other(format!("Goto canceled: {}", e)))?
    }

    /// Take a PNG screenshot; if `path` is Some, the bytes will also be saved to that path.
    pub async fn screenshot(&self, path: Option<&std::path::Path>, full_page: bool) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        let path_opt = path.map(|p| p.to_path_buf());
        let _ = self
            .cmd_tx
            .send(Command::Screenshot(self.id, path_opt, full_page, tx));
        rx.await
            .map_err(|e| Error::Other(format!("Screenshot canceled: {}", e)))?
    }

    /// Close this page context
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::ClosePage(self.id, tx));
        rx.await
            .map_err(|e| Error::Other(format!("ClosePage canceled: {}", e)))?
    }
}
