//! Filter engine: typed predicates that evaluate the same way in memory and
//! as parameterized SQL.

pub mod filter_set;
pub mod predicate;
pub mod value;

pub use filter_set::FilterSet;
pub use predicate::{FilterOperator, FilterPredicate, PlaceholderStyle, QueryFragment};
pub use value::{
    datetime_to_epoch, epoch_to_datetime, format_datetime, now_epoch, parse_datetime, FilterValue,
    NumberValue,
};
