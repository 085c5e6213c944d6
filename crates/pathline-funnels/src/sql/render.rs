use super::expr::{BinOp, Expr, Frame, FrameBound, SortDir};
use pathline_query::{Binder, Result};

/// Renders the expression IR to SQL text, resolving named parameters through
/// a shared [`Binder`]. One renderer per target dialect.
pub trait SqlRenderer {
    fn render(&self, expr: &Expr, binder: &mut Binder) -> Result<String>;
}

/// Postgres dialect renderer
#[derive(Debug, Default)]
pub struct PostgresRenderer;

impl PostgresRenderer {
    pub fn new() -> Self {
        Self
    }

    fn render_frame(&self, frame: &Frame) -> String {
        format!(
            "ROWS BETWEEN {} AND {}",
            Self::render_bound(frame.start),
            Self::render_bound(frame.end)
        )
    }

    fn render_bound(bound: FrameBound) -> String {
        match bound {
            FrameBound::UnboundedPreceding => "UNBOUNDED PRECEDING".to_string(),
            FrameBound::Preceding(n) => format!("{n} PRECEDING"),
            FrameBound::CurrentRow => "CURRENT ROW".to_string(),
        }
    }

    fn render_op(op: BinOp) -> &'static str {
        match op {
            BinOp::Eq => "=",
            BinOp::NotEq => "<>",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::ILike => "ILIKE",
            BinOp::IsDistinctFrom => "IS DISTINCT FROM",
        }
    }
}

impl SqlRenderer for PostgresRenderer {
    fn render(&self, expr: &Expr, binder: &mut Binder) -> Result<String> {
        match expr {
            Expr::Column(name) => Ok(name.clone()),
            Expr::Number(n) => Ok(n.to_string()),
            Expr::Param(name) => binder.placeholder(name),
            Expr::Null => Ok("NULL".to_string()),
            Expr::Binary(left, op, right) => {
                let l = self.render(left, binder)?;
                let r = self.render(right, binder)?;
                Ok(format!("({l} {} {r})", Self::render_op(*op)))
            }
            Expr::Not(inner) => Ok(format!("(NOT {})", self.render(inner, binder)?)),
            Expr::IsNull(inner) => Ok(format!("({} IS NULL)", self.render(inner, binder)?)),
            Expr::IsNotNull(inner) => {
                Ok(format!("({} IS NOT NULL)", self.render(inner, binder)?))
            }
            Expr::Func(name, args) => {
                let rendered = args
                    .iter()
                    .map(|a| self.render(a, binder))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{name}({})", rendered.join(", ")))
            }
            Expr::Case {
                branches,
                else_value,
            } => {
                let mut sql = String::from("CASE");
                for (condition, value) in branches {
                    sql.push_str(&format!(
                        " WHEN {} THEN {}",
                        self.render(condition, binder)?,
                        self.render(value, binder)?
                    ));
                }
                if let Some(fallback) = else_value {
                    sql.push_str(&format!(" ELSE {}", self.render(fallback, binder)?));
                }
                sql.push_str(" END");
                Ok(sql)
            }
            Expr::In(inner, candidates) => {
                let target = self.render(inner, binder)?;
                let rendered = candidates
                    .iter()
                    .map(|c| self.render(c, binder))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{target} IN ({})", rendered.join(", ")))
            }
            Expr::JsonText(column, key) => Ok(format!(
                "({} ->> {})",
                self.render(column, binder)?,
                self.render(key, binder)?
            )),
            Expr::Cast(inner, ty) => Ok(format!("({})::{ty}", self.render(inner, binder)?)),
            Expr::SecondsInterval(inner) => Ok(format!(
                "({} * INTERVAL '1 second')",
                self.render(inner, binder)?
            )),
            Expr::EpochDiff(later, earlier) => Ok(format!(
                "EXTRACT(EPOCH FROM ({} - {}))",
                self.render(later, binder)?,
                self.render(earlier, binder)?
            )),
            Expr::Window {
                func,
                partition_by,
                order_by,
                frame,
            } => {
                let mut over = Vec::new();
                if !partition_by.is_empty() {
                    let cols = partition_by
                        .iter()
                        .map(|p| self.render(p, binder))
                        .collect::<Result<Vec<_>>>()?;
                    over.push(format!("PARTITION BY {}", cols.join(", ")));
                }
                if !order_by.is_empty() {
                    let cols = order_by
                        .iter()
                        .map(|(e, dir)| {
                            let rendered = self.render(e, binder)?;
                            let dir = match dir {
                                SortDir::Asc => "ASC",
                                SortDir::Desc => "DESC",
                            };
                            Ok(format!("{rendered} {dir}"))
                        })
                        .collect::<Result<Vec<_>>>()?;
                    over.push(format!("ORDER BY {}", cols.join(", ")));
                }
                if let Some(frame) = frame {
                    over.push(self.render_frame(frame));
                }
                Ok(format!(
                    "{} OVER ({})",
                    self.render(func, binder)?,
                    over.join(" ")
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::expr::*;
    use pathline_query::Params;

    fn render(expr: &Expr, params: Params) -> (String, usize) {
        let mut binder = Binder::new(params);
        let sql = PostgresRenderer::new().render(expr, &mut binder).unwrap();
        let query = binder.finish(sql);
        (query.sql, query.values.len())
    }

    #[test]
    fn test_renders_predicate_with_params() {
        let expr = binary(
            eq(col("events.event"), param("step_0_event")),
            BinOp::And,
            eq(
                Expr::JsonText(Box::new(col("events.properties")), Box::new(param("key"))),
                param("value"),
            ),
        );
        let params = Params::new()
            .with("step_0_event", "sign up")
            .with("key", "$browser")
            .with("value", "Chrome");

        let (sql, count) = render(&expr, params);
        assert_eq!(
            sql,
            "((events.event = $1) AND ((events.properties ->> $2) = $3))"
        );
        assert_eq!(count, 3);
    }

    #[test]
    fn test_renders_windowed_min_with_trailing_frame() {
        let expr = min_over(
            col("latest_1"),
            vec![col("aggregation_target")],
            SortDir::Desc,
            trailing_frame(1),
        );
        let (sql, _) = render(&expr, Params::new());
        assert_eq!(
            sql,
            "MIN(latest_1) OVER (PARTITION BY aggregation_target ORDER BY timestamp DESC \
             ROWS BETWEEN UNBOUNDED PRECEDING AND 1 PRECEDING)"
        );
    }

    #[test]
    fn test_zero_offset_frame_is_current_row() {
        let expr = min_over(
            col("latest_1"),
            vec![],
            SortDir::Desc,
            trailing_frame(0),
        );
        let (sql, _) = render(&expr, Params::new());
        assert!(sql.ends_with("ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW)"));
    }

    #[test]
    fn test_case_and_interval_rendering() {
        let expr = case_when_else(
            lt_eq(
                col("latest_1"),
                binary(
                    col("latest_0"),
                    BinOp::Add,
                    Expr::SecondsInterval(Box::new(param("window_seconds"))),
                ),
            ),
            num(2),
            num(1),
        );
        let (sql, count) = render(&expr, Params::single("window_seconds", 604_800i64));
        assert_eq!(
            sql,
            "CASE WHEN (latest_1 <= (latest_0 + ($1 * INTERVAL '1 second'))) THEN 2 ELSE 1 END"
        );
        assert_eq!(count, 1);
    }

    #[test]
    fn test_param_reuse_keeps_single_slot() {
        let expr = binary(
            eq(col("a"), param("p")),
            BinOp::Or,
            eq(col("b"), param("p")),
        );
        let (sql, count) = render(&expr, Params::single("p", 1i64));
        assert_eq!(sql, "((a = $1) OR (b = $1))");
        assert_eq!(count, 1);
    }
}
