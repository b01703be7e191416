use crate::core::ReconcileError;
use crate::plan::Statement;

#[derive(Debug, Clone, PartialEq)]
pub struct StatementOutcome {
    pub statement: Statement,
    pub result: std::result::Result<usize, ReconcileError>,
}

impl StatementOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// `-- 3 records affected`, `-- No record affected` or `-- <error>`.
    pub fn notice(&self) -> String {
        match &self.result {
            Ok(0) => "-- No record affected".to_string(),
            Ok(1) => "-- 1 record affected".to_string(),
            Ok(n) => format!("-- {} records affected", n),
            Err(e) => format!("-- {}", e),
        }
    }
}

/// Per-statement outcomes of one execution, in execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionLog {
    outcomes: Vec<StatementOutcome>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, statement: Statement, result: std::result::Result<usize, ReconcileError>) {
        self.outcomes.push(StatementOutcome { statement, result });
    }

    pub fn outcomes(&self) -> &[StatementOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn rows_affected(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .sum()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ReconcileError> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }

    /// Review script: every statement followed by its notice.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for outcome in &self.outcomes {
            out.push_str(&outcome.statement.sql);
            out.push('\n');
            out.push_str(&outcome.notice());
            out.push_str("\n\n");
        }
        out
    }

    pub fn print(&self) {
        if self.outcomes.is_empty() {
            println!("Nothing to execute");
            return;
        }

        print!("{}", self.render());
        println!(
            "{} statement(s): {} succeeded, {} failed, {} row(s) affected",
            self.outcomes.len(),
            self.succeeded(),
            self.failed(),
            self.rows_affected()
        );
    }
}
