//! Statement and expression AST consumed by the executor and the
//! procedure runtime.

use crate::error::SourceLocation;
use crate::value::Ternary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Identical,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Boolean(bool),
    Ternary(Ternary),
    Integer(i64),
    Float(f64),
    String(String),
    FieldReference {
        view: Option<String>,
        column: String,
        loc: SourceLocation,
    },
    Wildcard {
        view: Option<String>,
    },
    Variable {
        name: String,
        loc: SourceLocation,
    },
    VariableSubstitution {
        name: String,
        expr: Box<Expr>,
        loc: SourceLocation,
    },
    EnvVar {
        name: String,
    },
    RuntimeInfo {
        name: String,
        loc: SourceLocation,
    },
    Flag {
        name: String,
        loc: SourceLocation,
    },
    Parens(Box<Expr>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Comparison {
        left: Box<Expr>,
        op: ComparisonOp,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Is {
        negated: bool,
        expr: Box<Expr>,
        value: Box<Expr>,
    },
    Like {
        negated: bool,
        expr: Box<Expr>,
        pattern: Box<Expr>,
    },
    Between {
        negated: bool,
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    In {
        negated: bool,
        expr: Box<Expr>,
        list: InList,
    },
    Exists(Box<SelectQuery>),
    Subquery(Box<SelectQuery>),
    Case {
        subject: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    Function {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
        wildcard: bool,
        over: Option<WindowSpec>,
        loc: SourceLocation,
    },
    CursorStatus {
        cursor: String,
        probe: CursorProbe,
        loc: SourceLocation,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InList {
    Values(Vec<Expr>),
    Subquery(Box<SelectQuery>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorProbe {
    IsOpen { negated: bool },
    IsInRange { negated: bool },
    Count,
    RowNumber,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsPosition {
    Default,
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub direction: SortDirection,
    pub nulls: NullsPosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub with: Vec<CommonTableExpr>,
    pub body: QueryExpr,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommonTableExpr {
    pub name: String,
    pub columns: Vec<String>,
    pub query: SelectQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    Select(SelectBody),
    SetOperation {
        op: SetOperator,
        all: bool,
        left: Box<QueryExpr>,
        right: Box<QueryExpr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectBody {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
    pub from: Vec<TableExpr>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableExpr {
    Table {
        name: String,
        alias: Option<String>,
        loc: SourceLocation,
    },
    Subquery {
        query: Box<SelectQuery>,
        alias: Option<String>,
        lateral: bool,
    },
    Values {
        rows: Vec<Vec<Expr>>,
        alias: Option<String>,
    },
    Stdin {
        alias: Option<String>,
    },
    Dual,
    Join {
        left: Box<TableExpr>,
        right: Box<TableExpr>,
        join_type: JoinType,
        natural: bool,
        condition: Option<Expr>,
        using: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPosition {
    Next,
    Prior,
    First,
    Last,
    Absolute,
    Relative,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableAssignment {
    pub name: String,
    pub expr: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionParameter {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnPosition {
    First,
    Last,
    After,
    Before,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefault {
    pub column: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowObjectType {
    Tables,
    Views,
    Cursors,
    Functions,
    Flags,
    Env,
    RuntimeInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Expr>>),
    Query(SelectQuery),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    SelectQuery(SelectQuery),
    Insert {
        table: TableExpr,
        columns: Vec<String>,
        source: InsertSource,
    },
    Update {
        table: TableExpr,
        assignments: Vec<(Expr, Expr)>,
        where_clause: Option<Expr>,
    },
    Delete {
        table: TableExpr,
        where_clause: Option<Expr>,
    },
    CreateTable {
        table: String,
        columns: Vec<String>,
        query: Option<SelectQuery>,
        loc: SourceLocation,
    },
    AddColumns {
        table: TableExpr,
        columns: Vec<ColumnDefault>,
        position: ColumnPosition,
        reference: Option<Expr>,
    },
    DropColumns {
        table: TableExpr,
        columns: Vec<Expr>,
    },
    RenameColumn {
        table: TableExpr,
        old: Expr,
        new: String,
    },
    VariableDeclaration(Vec<VariableAssignment>),
    VariableSubstitution {
        name: String,
        expr: Expr,
        loc: SourceLocation,
    },
    DisposeVariable(String),
    DisposeCursor(String),
    DisposeFunction(String),
    DisposeView(String),
    CursorDeclaration {
        name: String,
        query: SelectQuery,
    },
    OpenCursor(String),
    CloseCursor(String),
    Fetch {
        cursor: String,
        position: FetchPosition,
        number: Option<Expr>,
        variables: Vec<String>,
        loc: SourceLocation,
    },
    ViewDeclaration {
        name: String,
        columns: Vec<String>,
        query: Option<SelectQuery>,
    },
    FunctionDeclaration {
        name: String,
        parameters: Vec<FunctionParameter>,
        body: Vec<Statement>,
    },
    AggregateDeclaration {
        name: String,
        cursor: String,
        parameters: Vec<FunctionParameter>,
        body: Vec<Statement>,
    },
    If {
        branches: Vec<(Expr, Vec<Statement>)>,
        else_block: Vec<Statement>,
    },
    While {
        condition: Expr,
        body: Vec<Statement>,
    },
    WhileInCursor {
        variables: Vec<String>,
        cursor: String,
        body: Vec<Statement>,
        loc: SourceLocation,
    },
    Continue,
    Break,
    Exit(Option<i64>),
    Return(Option<Expr>),
    Commit,
    Rollback,
    Source(Expr),
    Execute {
        format: Expr,
        args: Vec<Expr>,
    },
    TriggerError {
        code: Option<i64>,
        message: Option<Expr>,
    },
    Print(Expr),
    Printf {
        format: Expr,
        args: Vec<Expr>,
    },
    Echo(Expr),
    SetFlag {
        name: String,
        value: Expr,
        loc: SourceLocation,
    },
    AddFlagElement {
        value: Expr,
        flag: String,
        loc: SourceLocation,
    },
    RemoveFlagElement {
        value: Expr,
        flag: String,
        loc: SourceLocation,
    },
    ShowFlag(String),
    ShowObjects(ShowObjectType),
    ShowFields(TableExpr),
    SetEnvVar {
        name: String,
        value: Expr,
    },
    UnsetEnvVar(String),
    Chdir(Expr),
    Pwd,
    Reload,
}

impl Expr {
    /// Best-effort source position for error reporting.
    pub fn location(&self) -> Option<SourceLocation> {
        match self {
            Expr::FieldReference { loc, .. }
            | Expr::Variable { loc, .. }
            | Expr::VariableSubstitution { loc, .. }
            | Expr::RuntimeInfo { loc, .. }
            | Expr::Flag { loc, .. }
            | Expr::Function { loc, .. }
            | Expr::CursorStatus { loc, .. } => Some(*loc),
            Expr::Parens(inner) | Expr::Unary { expr: inner, .. } => inner.location(),
            Expr::Binary { left, .. } | Expr::Comparison { left, .. } => left.location(),
            Expr::And(left, _) | Expr::Or(left, _) => left.location(),
            _ => None,
        }
    }

    /// Display text used for derived column names.
    pub fn field_name(&self) -> String {
        match self {
            Expr::FieldReference { column, .. } => column.clone(),
            Expr::Variable { name, .. } => format!("@{name}"),
            Expr::Function { name, .. } => name.clone(),
            Expr::Integer(i) => i.to_string(),
            Expr::Float(f) => f.to_string(),
            Expr::String(s) => s.clone(),
            Expr::Parens(inner) => inner.field_name(),
            _ => String::new(),
        }
    }
}
