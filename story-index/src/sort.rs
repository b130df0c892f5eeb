//! Story ordering: the story sort parameter and the stable sort over entries.

use crate::error::BoxError;
use crate::model::{IndexEntry, StoryId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A user comparator. Returning `Err` aborts the sort with a [`SortError`].
pub type StoryComparator =
    Arc<dyn Fn(&IndexEntry, &IndexEntry) -> Result<Ordering, BoxError> + Send + Sync>;

/// The user-supplied ordering for the index.
#[derive(Clone)]
pub enum StorySort {
    /// Declarative ordering list.
    Config(StorySortConfig),
    /// Arbitrary comparator.
    Custom(StoryComparator),
}

impl StorySort {
    /// Wrap a comparator closure.
    pub fn custom<F>(compare: F) -> Self
    where
        F: Fn(&IndexEntry, &IndexEntry) -> Result<Ordering, BoxError> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(compare))
    }

    /// Ordering list with the `configure` method.
    pub fn order(order: Vec<OrderItem>) -> Self {
        Self::Config(StorySortConfig {
            order,
            ..Default::default()
        })
    }
}

impl fmt::Debug for StorySort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(config) => f.debug_tuple("Config").field(config).finish(),
            Self::Custom(_) => f.write_str("Custom(<comparator>)"),
        }
    }
}

/// How names absent from the ordering list compare to each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMethod {
    /// Keep discovery order.
    #[default]
    Configure,
    /// Natural, case-insensitive order.
    Alphabetical,
}

/// One element of an ordering list: a title segment name (or `*`), or the
/// nested ordering for the preceding name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderItem {
    Name(String),
    Nested(Vec<OrderItem>),
}

impl From<&str> for OrderItem {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// Declarative story sort configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorySortConfig {
    #[serde(default)]
    pub method: SortMethod,
    #[serde(default)]
    pub order: Vec<OrderItem>,
    /// Treat the story name as a final title segment.
    #[serde(default)]
    pub include_names: bool,
}

/// A user comparator failed.
#[derive(Debug, Error)]
#[error("Error sorting stories with the story sort parameter (comparing '{left}' and '{right}'): {message}")]
pub struct SortError {
    pub left: StoryId,
    pub right: StoryId,
    pub message: String,
}

/// Stable sort of `entries` in place. Without a sort parameter the order is
/// left untouched.
pub fn sort_entries(entries: &mut [IndexEntry], sort: Option<&StorySort>) -> Result<(), SortError> {
    match sort {
        None => Ok(()),
        Some(StorySort::Config(config)) => {
            entries.sort_by(|a, b| compare_by_config(config, a, b));
            Ok(())
        }
        Some(StorySort::Custom(compare)) => {
            try_sort_by(entries, &mut |a: &IndexEntry, b: &IndexEntry| {
                compare(a, b).map_err(|e| SortError {
                    left: a.id.clone(),
                    right: b.id.clone(),
                    message: e.to_string(),
                })
            })
        }
    }
}

/// Stable merge sort with a fallible comparator. Stops at the first error;
/// `items` is then still a permutation of its input.
fn try_sort_by<T, E, F>(items: &mut [T], compare: &mut F) -> Result<(), E>
where
    T: Clone,
    F: FnMut(&T, &T) -> Result<Ordering, E>,
{
    let len = items.len();
    if len <= 1 {
        return Ok(());
    }
    let mid = len / 2;
    try_sort_by(&mut items[..mid], compare)?;
    try_sort_by(&mut items[mid..], compare)?;

    let mut merged = Vec::with_capacity(len);
    let (mut i, mut j) = (0, mid);
    while i < mid && j < len {
        // Right side wins only when strictly smaller, which keeps ties in order.
        if compare(&items[j], &items[i])? == Ordering::Less {
            merged.push(items[j].clone());
            j += 1;
        } else {
            merged.push(items[i].clone());
            i += 1;
        }
    }
    merged.extend_from_slice(&items[i..mid]);
    merged.extend_from_slice(&items[j..]);
    items.clone_from_slice(&merged);
    Ok(())
}

/// Compare two entries by title path against a (nested) ordering list.
pub fn compare_by_config(config: &StorySortConfig, a: &IndexEntry, b: &IndexEntry) -> Ordering {
    let mut path_a = title_segments(&a.title);
    let mut path_b = title_segments(&b.title);
    if config.include_names {
        path_a.push(a.name.trim());
        path_b.push(b.name.trim());
    }

    let mut order: &[OrderItem] = &config.order;
    let mut depth = 0;

    loop {
        let (name_a, name_b) = match (path_a.get(depth), path_b.get(depth)) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => (*a, *b),
        };

        if name_a != name_b {
            let index_a = position(order, name_a);
            let index_b = position(order, name_b);
            if index_a.is_some() || index_b.is_some() {
                let fallback = position(order, "*").unwrap_or(order.len());
                return index_a.unwrap_or(fallback).cmp(&index_b.unwrap_or(fallback));
            }
            return match config.method {
                SortMethod::Configure => Ordering::Equal,
                SortMethod::Alphabetical => natural_cmp(name_a, name_b),
            };
        }

        let index = position(order, name_a).or_else(|| position(order, "*"));
        order = match index.and_then(|i| order.get(i + 1)) {
            Some(OrderItem::Nested(nested)) => nested,
            _ => &[],
        };
        depth += 1;
    }
}

fn title_segments(title: &str) -> Vec<&str> {
    title
        .trim()
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn position(order: &[OrderItem], name: &str) -> Option<usize> {
    order
        .iter()
        .position(|item| matches!(item, OrderItem::Name(n) if n == name))
}

/// Case-insensitive comparison with digit runs compared numerically.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let num_a = take_digits(&mut left);
                let num_b = take_digits(&mut right);
                let ordering = num_a
                    .len()
                    .cmp(&num_b.len())
                    .then_with(|| num_a.cmp(&num_b));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                let ordering = x.to_lowercase().cmp(y.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        digits.push(c);
        chars.next();
    }
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
