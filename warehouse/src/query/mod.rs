//! Declarative queries over component composition.
//!
//! A [`Query`] is a boolean expression over component types: [`Query::and`], [`Query::or`] and
//! [`Query::not`], nestable to any depth. Compiling it against a [`Schema`] yields a [`Filter`]
//! evaluated once per table mask, never per entity, since every entity of a table shares the
//! table's components.
//!
//! A [`Cursor`] walks every row of every matching table, locking each table while inside it.
//! [`Accessor`]s read component values at the cursor position.
//!
//! ```rust,ignore
//! let movers = Query::and([position.element(), velocity.element()]);
//! let idle = Query::and([Term::from(position.element()), Query::not([velocity.element()]).into()]);
//!
//! let mut cursor = Cursor::new(&movers);
//! while cursor.next(&mut storage)? {
//!     let v = velocity.get_from_cursor(&cursor, &storage)?.clone();
//!     let p = position.get_from_cursor_mut(&cursor, &mut storage)?;
//!     p.x += v.dx;
//! }
//! ```
//!
//! # Semantics
//!
//! - `and(P, Q)` matches tables storing both P and Q. An empty `and` matches every table.
//! - `or(P, Q)` matches tables storing either. An empty `or` matches nothing.
//! - `not(P, Q)` matches tables storing neither. An empty `not` matches every table.
//!
//! A component type the schema has never seen is stored by no table: it makes an `and`
//! unsatisfiable and is ignored by `or` and `not`.

mod accessor;
mod cursor;

pub use accessor::Accessor;
pub use cursor::Cursor;

use crate::{element::ElementType, mask::Mask, schema::Schema};

/// An operand of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Element(ElementType),
    Query(Query),
}

impl From<ElementType> for Term {
    fn from(element: ElementType) -> Self {
        Term::Element(element)
    }
}

impl From<Query> for Term {
    fn from(query: Query) -> Self {
        Term::Query(query)
    }
}

/// How the terms of a query combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
    Not,
}

/// A boolean expression over component types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    operator: Operator,
    terms: Vec<Term>,
}

impl Query {
    /// Match tables storing every term.
    pub fn and<I>(terms: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Term>,
    {
        Self::new(Operator::And, terms)
    }

    /// Match tables storing any term.
    pub fn or<I>(terms: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Term>,
    {
        Self::new(Operator::Or, terms)
    }

    /// Match tables storing none of the terms.
    pub fn not<I>(terms: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Term>,
    {
        Self::new(Operator::Not, terms)
    }

    fn new<I>(operator: Operator, terms: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Term>,
    {
        Self {
            operator,
            terms: terms.into_iter().map(Into::into).collect(),
        }
    }

    #[inline]
    pub fn operator(&self) -> Operator {
        self.operator
    }

    #[inline]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Resolve the query against the rows `schema` has assigned so far.
    pub fn compile(&self, schema: &dyn Schema) -> Filter {
        let mut mask = Mask::new();
        let mut nested = Vec::new();
        for term in self.terms.iter() {
            match term {
                Term::Element(element) => match schema.row_index(element) {
                    // The schema only issues rows below the mask capacity.
                    Ok(row) => {
                        let marked = mask.mark(row);
                        debug_assert!(marked.is_ok(), "schema issued row {row} beyond the mask");
                    }
                    Err(_) if self.operator == Operator::And => return Filter::Never,
                    Err(_) => {}
                },
                Term::Query(query) => match query.compile(schema) {
                    Filter::Never if self.operator == Operator::And => return Filter::Never,
                    Filter::Never => {}
                    filter => nested.push(filter),
                },
            }
        }

        match self.operator {
            Operator::And => Filter::All(mask, nested),
            Operator::Or => Filter::Any(mask, nested),
            Operator::Not => Filter::Exclude(mask, nested),
        }
    }
}

/// A query compiled to masks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Matches no table.
    Never,
    /// Every marked row and every nested filter.
    All(Mask, Vec<Filter>),
    /// Any marked row or any nested filter.
    Any(Mask, Vec<Filter>),
    /// No marked row and no nested filter.
    Exclude(Mask, Vec<Filter>),
}

impl Filter {
    /// Whether a table with `mask` satisfies the filter.
    pub fn matches(&self, mask: &Mask) -> bool {
        match self {
            Filter::Never => false,
            Filter::All(required, nested) => {
                mask.contains_all(required) && nested.iter().all(|filter| filter.matches(mask))
            }
            Filter::Any(wanted, nested) => {
                mask.contains_any(wanted) || nested.iter().any(|filter| filter.matches(mask))
            }
            Filter::Exclude(excluded, nested) => {
                mask.contains_none(excluded) && !nested.iter().any(|filter| filter.matches(mask))
            }
        }
    }
}
