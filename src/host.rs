//! Minimal terminal host for log documents
//!
//! Plays the editor's part: reads documents through the router, re-reads
//! when a change notification names the open document, and announces the
//! close when the user stops following.

use std::future::Future;
use std::io::Write;

use anyhow::Result;
use tokio::sync::mpsc;

use fleetscope_logs::{ChangeEvents, ContentSlice, DocumentRouter, LogLocator};

/// Tracks how much of a document has already been printed
#[derive(Debug, Default)]
struct DocumentView {
    /// Absolute offset of the end of the printed text
    shown_end: usize,
}

impl DocumentView {
    fn render<W: Write>(&mut self, slice: ContentSlice, out: &mut W) -> Result<()> {
        if !slice.text.is_empty() {
            out.write_all(slice.text.as_bytes())?;
            out.flush()?;
        }
        self.shown_end = slice.end;
        Ok(())
    }
}

pub struct TerminalHost<W> {
    router: DocumentRouter,
    closed: mpsc::UnboundedSender<LogLocator>,
    out: W,
}

impl<W: Write> TerminalHost<W> {
    pub fn new(router: DocumentRouter, closed: mpsc::UnboundedSender<LogLocator>, out: W) -> Self {
        Self {
            router,
            closed,
            out,
        }
    }

    /// Print a document once and close it
    pub fn render_once(&mut self, locator: &LogLocator) -> Result<()> {
        let slice = self.router.content_since(locator, 0)?;
        DocumentView::default().render(slice, &mut self.out)?;
        self.close(locator);
        Ok(())
    }

    /// Print a document and everything appended to it until `stop` resolves
    /// or the provider's change channel closes.
    pub async fn follow<F>(
        &mut self,
        locator: &LogLocator,
        changes: &mut ChangeEvents,
        stop: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut view = DocumentView::default();
        self.refresh(locator, &mut view)?;

        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = &mut stop => break,

                changed = changes.recv() => {
                    match changed {
                        Some(changed) if &changed == locator => {
                            self.refresh(locator, &mut view)?;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }

        self.close(locator);
        Ok(())
    }

    /// Print whatever the view has not shown yet
    fn refresh(&mut self, locator: &LogLocator, view: &mut DocumentView) -> Result<()> {
        let slice = self.router.content_since(locator, view.shown_end)?;
        view.render(slice, &mut self.out)
    }

    fn close(&self, locator: &LogLocator) {
        if self.closed.send(locator.clone()).is_err() {
            tracing::debug!(document = %locator, "no close listener");
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }
}
