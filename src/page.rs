//! Lazy iteration over paged query and scan results

use std::collections::VecDeque;

use crate::{
    store::{PageOutput, QueryCommand, ScanCommand},
    Attributes, Error, Table,
};

/// An asynchronous iterator over query or scan results
///
/// The iterator yields every item of the page already fetched, then, while
/// a continuation cursor remains, transparently fetches the next page and
/// continues. The backing command is cloned per fetch, so a `Pages` value
/// never aliases the builder it was created from.
#[must_use]
pub struct Pages {
    source: PageSource,
    buffer: VecDeque<Attributes>,
    cursor: Option<Attributes>,
    started: bool,
}

enum PageSource {
    Query { table: Table, command: QueryCommand },
    Scan { table: Table, command: ScanCommand },
    Ready,
}

impl std::fmt::Debug for Pages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            PageSource::Query { .. } => "query",
            PageSource::Scan { .. } => "scan",
            PageSource::Ready => "ready",
        };
        f.debug_struct("Pages")
            .field("source", &source)
            .field("buffered", &self.buffer.len())
            .field("has_cursor", &self.cursor.is_some())
            .field("started", &self.started)
            .finish()
    }
}

impl Pages {
    pub(crate) fn query(table: Table, command: QueryCommand) -> Self {
        Self {
            source: PageSource::Query { table, command },
            buffer: VecDeque::new(),
            cursor: None,
            started: false,
        }
    }

    pub(crate) fn scan(table: Table, command: ScanCommand) -> Self {
        Self {
            source: PageSource::Scan { table, command },
            buffer: VecDeque::new(),
            cursor: None,
            started: false,
        }
    }

    /// A result whose items are already in hand
    pub(crate) fn ready(items: Vec<Attributes>) -> Self {
        Self {
            source: PageSource::Ready,
            buffer: items.into(),
            cursor: None,
            started: true,
        }
    }

    /// Advance the iterator, fetching the next page when the current one
    /// is exhausted
    pub async fn next(&mut self) -> Result<Option<Attributes>, Error> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            if self.started && self.cursor.is_none() {
                return Ok(None);
            }
            let page = self.fetch().await?;
            self.started = true;
            self.cursor = page.last_evaluated_key;
            self.buffer = page.items.into();
        }
    }

    /// Drain the iterator eagerly into a vector
    pub async fn to_array(mut self) -> Result<Vec<Attributes>, Error> {
        let mut items = Vec::with_capacity(self.buffer.len());
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// The continuation cursor after the most recent fetch, for
    /// hand-rolled pagination
    pub fn last_evaluated_cursor(&self) -> Option<&Attributes> {
        self.cursor.as_ref()
    }

    /// Whether more pages may remain
    ///
    /// Advisory: a store may return a cursor for a final page that turns
    /// out to be empty.
    pub fn has_more_pages(&self) -> bool {
        !self.started || self.cursor.is_some()
    }

    async fn fetch(&mut self) -> Result<PageOutput, Error> {
        match &self.source {
            PageSource::Query { table, command } => {
                let mut command = command.clone();
                if self.started {
                    command.start_key = self.cursor.take();
                }
                table.client().query(table.table_name(), command).await
            }
            PageSource::Scan { table, command } => {
                let mut command = command.clone();
                if self.started {
                    command.start_key = self.cursor.take();
                }
                table.client().scan(table.table_name(), command).await
            }
            PageSource::Ready => Ok(PageOutput::default()),
        }
    }
}
