//! Expectation engine: ordered queue consumption, file writes and assertions

use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::env::FileMap;
use crate::error::{HotError, HotResult};
use crate::html::{normalize, HtmlExpect};
use crate::interpreter::Interpreter;
use crate::spec::{Expectation, Label, Step};

impl Interpreter {
    /// Pop pending expectations in order until `until` has been asserted, or
    /// until the queue is empty when `until` is `None`.
    ///
    /// Each popped label's files are written (and settled) before asserting,
    /// unless `already_written` is set.
    pub(crate) async fn consume_expects(
        &mut self,
        until: Option<&Label>,
        already_written: bool,
    ) -> HotResult<()> {
        while let Some((label, expectation)) = self
            .state
            .remaining_expects
            .as_mut()
            .and_then(VecDeque::pop_front)
        {
            if !already_written {
                let files = self.state.render_label(&label);
                self.write_files(&files).await?;
            }
            self.assert_expect(&label, &expectation).await?;
            if until == Some(&label) {
                break;
            }
        }
        Ok(())
    }

    pub(crate) async fn flush_expects(&mut self) -> HotResult<()> {
        let pending = self.state.pending_labels();
        if !pending.is_empty() {
            debug!("Flushing {} pending expectation(s)", pending.len());
        }
        self.consume_expects(None, false).await
    }

    /// Move to `label`: assert everything pending up to it, or just write its
    /// files when it is not pending
    pub(crate) async fn change(&mut self, label: &Label) -> HotResult<()> {
        if self.state.is_pending(label) {
            return self.consume_expects(Some(label), false).await;
        }
        debug!("[{}] is not pending, writing without assertion", label);
        let files = self.state.render_label(label);
        self.write_files(&files).await
    }

    /// Write files and wait for the page to settle, bounded by the settle timeout
    pub(crate) async fn write_files(&self, files: &FileMap) -> HotResult<()> {
        if files.is_empty() {
            return Ok(());
        }
        let page = self.page()?;
        debug!("Writing {:?}", files.keys().collect::<Vec<_>>());

        tokio::time::timeout(
            self.config.settle_timeout(),
            self.env.write_and_settle(page.as_ref(), files),
        )
        .await
        .map_err(|_| {
            HotError::Timeout(format!(
                "page to settle after writing {:?}",
                files.keys().collect::<Vec<_>>()
            ))
        })?
    }

    async fn assert_expect(&mut self, label: &Label, expectation: &Expectation) -> HotResult<()> {
        match &expectation.title {
            Some(title) => info!("Asserting [{}] {}", label, title),
            None => info!("Asserting [{}]", label),
        }

        if let Some(before) = &expectation.before {
            self.consume_sub(before).await?;
        }
        for step in &expectation.steps {
            match step {
                Step::Html(expected) => self.assert_html(label, expected).await?,
                Step::Sub(sub) => self.consume_sub(sub).await?,
                Step::Function(callback) => callback().await?,
            }
        }
        if let Some(after) = &expectation.after {
            self.consume_sub(after).await?;
        }
        Ok(())
    }

    async fn assert_html(&self, label: &Label, expected: &HtmlExpect) -> HotResult<()> {
        let actual = self.rendered_html(label).await?;
        expected.check(&actual).map_err(|reason| {
            warn!("[{}] mismatch: {}", label, reason);
            HotError::Assertion {
                label: label.to_string(),
                expected: expected.to_string(),
                actual: normalize(&actual),
            }
        })
    }

    /// HTML of the focus marker if present, else of the app root, without the configured prefix
    async fn rendered_html(&self, label: &Label) -> HotResult<String> {
        let page = self.page()?;
        let html = match page.inner_html(&self.config.focus_selector).await? {
            Some(html) => html,
            None => page
                .inner_html(&self.config.app_root_selector)
                .await?
                .ok_or_else(|| HotError::Assertion {
                    label: label.to_string(),
                    expected: format!(
                        "an element matching {} or {}",
                        self.config.focus_selector, self.config.app_root_selector
                    ),
                    actual: "no such element".to_string(),
                })?,
        };

        let Some(prefix) = &self.config.html_prefix else {
            return Ok(html);
        };
        match html.strip_prefix(prefix.as_str()) {
            Some(rest) => Ok(rest.to_string()),
            None => Err(HotError::Assertion {
                label: label.to_string(),
                expected: format!("output starting with {:?}", prefix),
                actual: html,
            }),
        }
    }
}
