/// Loading / Content / Error: the three states a supplied value can be observed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lce<E, T> {
    Loading,
    Content(T),
    Error(E),
}

impl<E, T> Lce<E, T> {
    pub fn fold<R>(
        self,
        on_loading: impl FnOnce() -> R,
        on_content: impl FnOnce(T) -> R,
        on_error: impl FnOnce(E) -> R,
    ) -> R {
        match self {
            Self::Loading => on_loading(),
            Self::Content(value) => on_content(value),
            Self::Error(error) => on_error(error),
        }
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[must_use]
    pub const fn content(&self) -> Option<&T> {
        match self {
            Self::Content(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn error(&self) -> Option<&E> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lce<E, U> {
        match self {
            Self::Loading => Lce::Loading,
            Self::Content(value) => Lce::Content(f(value)),
            Self::Error(error) => Lce::Error(error),
        }
    }

    /// `None` while loading
    pub fn into_result(self) -> Option<Result<T, E>> {
        self.fold(|| None, |value| Some(Ok(value)), |error| Some(Err(error)))
    }
}

impl<E, T> From<Result<T, E>> for Lce<E, T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Content(value),
            Err(error) => Self::Error(error),
        }
    }
}
