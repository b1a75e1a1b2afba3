use crate::supply::SupplyError;

/// Position of the next page to request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageCursor {
    /// 1-based page number
    Page(u32),
    /// Opaque continuation token handed out by the backend
    Token(String),
}

impl PageCursor {
    #[must_use]
    pub const fn first() -> Self {
        Self::Page(1)
    }

    #[must_use]
    pub const fn is_first(&self) -> bool {
        matches!(self, Self::Page(1))
    }

    /// Cursor implied by this one when the backend does not hand out its own.
    /// Tokens cannot be derived, so there is none.
    #[must_use]
    pub fn following(&self) -> Option<Self> {
        match self {
            Self::Page(page) => page.checked_add(1).map(Self::Page),
            Self::Token(_) => None,
        }
    }
}

impl Default for PageCursor {
    fn default() -> Self {
        Self::first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest<P> {
    pub params: P,
    pub cursor: PageCursor,
    pub limit: usize,
}

/// One page as returned by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<PageCursor>,
    /// Explicit end marker when the backend provides one
    pub last: Option<bool>,
}

impl<T> Page<T> {
    #[must_use]
    pub const fn new(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
            last: None,
        }
    }

    #[must_use]
    pub fn with_next_cursor(mut self, cursor: PageCursor) -> Self {
        self.next_cursor = Some(cursor);
        self
    }

    #[must_use]
    pub const fn with_last(mut self, last: bool) -> Self {
        self.last = Some(last);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationState<P> {
    pub next_cursor: PageCursor,
    pub params: P,
    pub is_last_page: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchFetchResult<T> {
    Success { data: T, empty: bool, last: bool },
    Error(SupplyError),
}

impl<T> BatchFetchResult<T> {
    #[must_use]
    pub const fn is_last(&self) -> bool {
        matches!(self, Self::Success { last: true, .. })
    }

    #[must_use]
    pub const fn data(&self) -> Option<&T> {
        match self {
            Self::Success { data, .. } => Some(data),
            Self::Error(_) => None,
        }
    }

    #[must_use]
    pub const fn error(&self) -> Option<&SupplyError> {
        match self {
            Self::Success { .. } => None,
            Self::Error(error) => Some(error),
        }
    }
}

impl<I> BatchFetchResult<Vec<I>> {
    pub(crate) fn success(items: Vec<I>, last: bool) -> Self {
        Self::Success {
            empty: items.is_empty(),
            data: items,
            last,
        }
    }
}
