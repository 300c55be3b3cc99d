//! Load tracking for lists fetched from the backend.
//!
//! `initialized` flips on the first completed load (success or failure), so
//! "nothing loaded yet" and "loaded, and there is nothing" stay distinct.

use crate::errors::MarketError;

#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    /// The backing table does not exist; offer to create it.
    SchemaNotReady { table: String },
    NotAuthenticated,
    Failed(String),
}

impl From<&MarketError> for LoadError {
    fn from(err: &MarketError) -> Self {
        match err {
            MarketError::SchemaNotReady { table } => LoadError::SchemaNotReady {
                table: table.clone(),
            },
            MarketError::NotAuthenticated => LoadError::NotAuthenticated,
            other => LoadError::Failed(other.user_message()),
        }
    }
}

/// What a view should render right now.
#[derive(Debug, PartialEq)]
pub enum LoadView<'a, T> {
    Loading,
    Empty,
    Ready(&'a [T]),
    SchemaNotReady(&'a str),
    Error(&'a str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Loadable<T> {
    items: Vec<T>,
    initialized: bool,
    loading: bool,
    error: Option<LoadError>,
}

impl<T> Default for Loadable<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            initialized: false,
            loading: false,
            error: None,
        }
    }
}

impl<T> Loadable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) {
        self.loading = true;
    }

    pub fn succeed(&mut self, items: Vec<T>) {
        self.items = items;
        self.loading = false;
        self.initialized = true;
        self.error = None;
    }

    /// Record a failure; previously loaded items are kept.
    pub fn fail(&mut self, err: &MarketError) {
        self.loading = false;
        self.initialized = true;
        self.error = Some(LoadError::from(err));
    }

    /// Store the outcome of a fetch and hand the error back to the caller.
    pub fn settle(&mut self, result: Result<Vec<T>, MarketError>) -> Result<&[T], MarketError> {
        match result {
            Ok(items) => {
                self.succeed(items);
                Ok(&self.items)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut Vec<T> {
        &mut self.items
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&LoadError> {
        self.error.as_ref()
    }

    /// Loaded successfully and got nothing back.
    pub fn is_empty_result(&self) -> bool {
        self.initialized && self.error.is_none() && self.items.is_empty()
    }

    pub fn view(&self) -> LoadView<'_, T> {
        if !self.initialized {
            return LoadView::Loading;
        }
        match &self.error {
            Some(LoadError::SchemaNotReady { table }) => LoadView::SchemaNotReady(table),
            Some(LoadError::NotAuthenticated) => LoadView::Error("Please sign in to continue"),
            Some(LoadError::Failed(message)) => LoadView::Error(message),
            None if self.items.is_empty() => LoadView::Empty,
            None => LoadView::Ready(&self.items),
        }
    }
}
