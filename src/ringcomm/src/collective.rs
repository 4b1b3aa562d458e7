use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Reduction operator applied elementwise by `all_reduce`. Every operator is
/// associative and commutative, which is what lets the ring combine partial
/// results pairwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
}

/// Element types a reduction buffer may hold.
pub trait ReduceElement:
    Copy + PartialEq + std::fmt::Debug + Serialize + DeserializeOwned + Send + 'static
{
    fn combine(op: ReduceOp, acc: Self, x: Self) -> Self;

    /// Wire tag carried with every chunk; bincode is not self-describing, so
    /// a cross-rank element-type mismatch is only catchable by name.
    fn type_tag() -> &'static str;
}

macro_rules! impl_reduce_element {
    ($($ty:ty),*) => {
        $(
            impl ReduceElement for $ty {
                fn combine(op: ReduceOp, acc: Self, x: Self) -> Self {
                    match op {
                        ReduceOp::Sum => acc + x,
                        ReduceOp::Prod => acc * x,
                        ReduceOp::Min => acc.min(x),
                        ReduceOp::Max => acc.max(x),
                    }
                }

                fn type_tag() -> &'static str {
                    stringify!($ty)
                }
            }
        )*
    };
}

impl_reduce_element!(i32, i64, u32, u64, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_covers_all_ops() {
        assert_eq!(i64::combine(ReduceOp::Sum, 3, 4), 7);
        assert_eq!(i64::combine(ReduceOp::Prod, 3, 4), 12);
        assert_eq!(i64::combine(ReduceOp::Min, 3, 4), 3);
        assert_eq!(i64::combine(ReduceOp::Max, 3, 4), 4);
        assert_eq!(f32::combine(ReduceOp::Sum, 0.5, 0.25), 0.75);
        assert_eq!(f64::combine(ReduceOp::Max, -1.0, -2.0), -1.0);
    }

    #[test]
    fn type_tags_name_the_element_type() {
        assert_eq!(f32::type_tag(), "f32");
        assert_eq!(u32::type_tag(), "u32");
        assert_ne!(i64::type_tag(), u64::type_tag());
    }
}
