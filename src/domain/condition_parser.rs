//! Condition DSL parser.
//!
//! One condition per line:
//!
//! ```text
//! <indicator> <op> <operand> [weight=N] [required] [label="..."] [AND|OR]
//! ```
//!
//! `<op>` is one of `== != > >= < <= BETWEEN CROSS_ABOVE CROSS_BELOW`.
//! `<operand>` is a number, an indicator, or `[min, max]` for `BETWEEN`.
//! The trailing `AND`/`OR` joins the condition to the next one in its group.
//! Errors carry the character offset of the offending token.

use crate::domain::condition::{Comparand, Condition, Operator, Relation};
use crate::domain::error::ParseError;
use crate::domain::indicator::IndicatorKind;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            message,
            position: self.pos,
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn consume_exact(&mut self, s: &str) -> bool {
        if self.remaining().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn peek_word(&self) -> String {
        let word: String = self
            .remaining()
            .chars()
            .take_while(|ch| ch.is_alphanumeric() || *ch == '_')
            .collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_integer(&mut self) -> Result<usize, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
            self.advance();
        }
        if self.pos == start {
            return Err(ParseError {
                message: "expected integer".to_string(),
                position: start,
            });
        }
        let num_str = &self.input[start..self.pos];
        num_str.parse::<usize>().map_err(|_| ParseError {
            message: format!("invalid integer: {}", num_str),
            position: start,
        })
    }

    fn parse_window(&mut self) -> Result<usize, ParseError> {
        let start = self.pos;
        let n = self.parse_integer()?;
        self.expect_char(')')?;
        if n == 0 {
            return Err(ParseError {
                message: "indicator window must be positive".to_string(),
                position: start,
            });
        }
        Ok(n)
    }

    fn parse_indicator(&mut self) -> Result<IndicatorKind, ParseError> {
        self.skip_whitespace();

        let windowed: [(&str, fn(usize) -> IndicatorKind); 6] = [
            ("SMA(", IndicatorKind::Sma),
            ("EMA(", IndicatorKind::Ema),
            ("RSI(", IndicatorKind::Rsi),
            ("RS(", IndicatorKind::RelativeStrength),
            ("RS_RANK(", IndicatorKind::RsRank),
            ("VOLUME_RATIO(", IndicatorKind::VolumeRatio),
        ];
        for (prefix, make) in windowed {
            if self.consume_exact(prefix) {
                return Ok(make(self.parse_window()?));
            }
        }

        let plain = [
            ("MACD_SIGNAL", IndicatorKind::MacdSignal),
            ("MACD_HIST", IndicatorKind::MacdHistogram),
            ("MACD", IndicatorKind::MacdLine),
            ("PRICE_CHANGE", IndicatorKind::PriceChange),
            ("CLOSE", IndicatorKind::Close),
            ("VOLUME", IndicatorKind::Volume),
        ];
        for (keyword, kind) in plain {
            if self.consume_keyword(keyword) {
                return Ok(kind);
            }
        }

        let word = self.peek_word();
        Err(self.error(format!("expected indicator, found '{}'", word)))
    }

    fn parse_operator(&mut self) -> Result<Operator, ParseError> {
        self.skip_whitespace();

        let symbols = [
            ("==", Operator::Eq),
            ("!=", Operator::Ne),
            (">=", Operator::Ge),
            ("<=", Operator::Le),
            (">", Operator::Gt),
            ("<", Operator::Lt),
        ];
        for (symbol, op) in symbols {
            if self.consume_exact(symbol) {
                return Ok(op);
            }
        }

        let keywords = [
            ("BETWEEN", Operator::Between),
            ("CROSS_ABOVE", Operator::CrossAbove),
            ("CROSS_BELOW", Operator::CrossBelow),
        ];
        for (keyword, op) in keywords {
            if self.consume_keyword(keyword) {
                return Ok(op);
            }
        }

        let word = self.peek_word();
        Err(self.error(format!("expected operator, found '{}'", word)))
    }

    fn parse_comparand(&mut self, op: Operator) -> Result<Comparand, ParseError> {
        self.skip_whitespace();

        if op == Operator::Between {
            self.expect_char('[')?;
            let min = self.parse_number()?;
            self.expect_char(',')?;
            let max = self.parse_number()?;
            self.expect_char(']')?;
            if min > max {
                return Err(self.error(format!("range minimum {} exceeds maximum {}", min, max)));
            }
            return Ok(Comparand::Range { min, max });
        }

        if self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || ch == '-' || ch == '.')
        {
            return Ok(Comparand::Value(self.parse_number()?));
        }
        if self.peek() == Some('[') {
            return Err(self.error(format!("a range is only valid with BETWEEN, not {}", op)));
        }
        Ok(Comparand::Indicator(self.parse_indicator()?))
    }

    fn parse_label(&mut self) -> Result<String, ParseError> {
        self.expect_char('"')?;
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch == '"' {
                let label = self.input[start..self.pos].to_string();
                self.advance();
                return Ok(label);
            }
            self.advance();
        }
        Err(ParseError {
            message: "unterminated label".to_string(),
            position: start,
        })
    }

    fn parse_modifiers(&mut self, condition: &mut Condition) -> Result<(), ParseError> {
        loop {
            self.skip_whitespace();
            if self.pos >= self.input.len() {
                return Ok(());
            }

            if self.consume_keyword("weight") {
                self.expect_char('=')?;
                let start = self.pos;
                let weight = self.parse_integer()?;
                condition.weight = u32::try_from(weight)
                    .ok()
                    .filter(|w| *w > 0)
                    .ok_or(ParseError {
                        message: format!("weight must be a positive integer, found {}", weight),
                        position: start,
                    })?;
            } else if self.consume_keyword("required") {
                condition.required = true;
            } else if self.consume_keyword("label") {
                self.expect_char('=')?;
                condition.label = Some(self.parse_label()?);
            } else if self.consume_keyword("AND") {
                condition.relation = Relation::And;
                return self.expect_end();
            } else if self.consume_keyword("OR") {
                condition.relation = Relation::Or;
                return self.expect_end();
            } else {
                let word = self.peek_word();
                return Err(self.error(format!("unexpected input after condition: '{}'", word)));
            }
        }
    }

    fn expect_end(&mut self) -> Result<(), ParseError> {
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(self.error(format!(
                "unexpected input after relation: '{}'",
                self.remaining()
            )));
        }
        Ok(())
    }

    fn parse(&mut self) -> Result<Condition, ParseError> {
        let indicator = self.parse_indicator()?;
        let operator = self.parse_operator()?;
        let comparand = self.parse_comparand(operator)?;
        let mut condition = Condition::new(indicator, operator, comparand);
        self.parse_modifiers(&mut condition)?;
        Ok(condition)
    }
}

pub fn parse_condition(input: &str) -> Result<Condition, ParseError> {
    Parser::new(input).parse()
}

/// Inverse of [`parse_condition`].
pub fn render_condition(condition: &Condition) -> String {
    let mut out = condition.to_string();
    if condition.weight != 1 {
        out.push_str(&format!(" weight={}", condition.weight));
    }
    if condition.required {
        out.push_str(" required");
    }
    if let Some(label) = &condition.label {
        out.push_str(&format!(" label=\"{}\"", label));
    }
    if condition.relation == Relation::Or {
        out.push_str(" OR");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_constant_comparison() {
        let c = parse_condition("RSI(14) < 30").unwrap();
        assert_eq!(c.indicator, IndicatorKind::Rsi(14));
        assert_eq!(c.operator, Operator::Lt);
        assert_eq!(c.comparand, Comparand::Value(30.0));
        assert_eq!(c.weight, 1);
        assert!(!c.required);
        assert_eq!(c.relation, Relation::And);
    }

    #[test]
    fn parse_indicator_comparand() {
        let c = parse_condition("SMA(5) CROSS_ABOVE SMA(20)").unwrap();
        assert_eq!(c.operator, Operator::CrossAbove);
        assert_eq!(c.comparand, Comparand::Indicator(IndicatorKind::Sma(20)));
    }

    #[test]
    fn parse_between_range() {
        let c = parse_condition("RSI(14) BETWEEN [40, 60.5]").unwrap();
        assert_eq!(c.comparand, Comparand::Range { min: 40.0, max: 60.5 });
    }

    #[test]
    fn parse_all_operators() {
        for (text, op) in [
            ("CLOSE == 1", Operator::Eq),
            ("CLOSE != 1", Operator::Ne),
            ("CLOSE > 1", Operator::Gt),
            ("CLOSE >= 1", Operator::Ge),
            ("CLOSE < 1", Operator::Lt),
            ("CLOSE <= 1", Operator::Le),
            ("CLOSE CROSS_BELOW 1", Operator::CrossBelow),
        ] {
            assert_eq!(parse_condition(text).unwrap().operator, op, "{}", text);
        }
    }

    #[test]
    fn parse_all_indicators() {
        for (text, kind) in [
            ("CLOSE > 0", IndicatorKind::Close),
            ("VOLUME > 0", IndicatorKind::Volume),
            ("EMA(12) > 0", IndicatorKind::Ema(12)),
            ("MACD > 0", IndicatorKind::MacdLine),
            ("MACD_SIGNAL > 0", IndicatorKind::MacdSignal),
            ("MACD_HIST > 0", IndicatorKind::MacdHistogram),
            ("RS(60) > 0", IndicatorKind::RelativeStrength(60)),
            ("RS_RANK(60) > 80", IndicatorKind::RsRank(60)),
            ("VOLUME_RATIO(20) > 2", IndicatorKind::VolumeRatio(20)),
            ("PRICE_CHANGE > 0", IndicatorKind::PriceChange),
        ] {
            assert_eq!(parse_condition(text).unwrap().indicator, kind, "{}", text);
        }
    }

    #[test]
    fn parse_modifiers_and_relation() {
        let c =
            parse_condition(r#"MACD_HIST > 0 weight=3 required label="momentum up" OR"#).unwrap();
        assert_eq!(c.weight, 3);
        assert!(c.required);
        assert_eq!(c.label.as_deref(), Some("momentum up"));
        assert_eq!(c.relation, Relation::Or);
    }

    #[test]
    fn parse_negative_and_whitespace() {
        let c = parse_condition("   PRICE_CHANGE   <   -2.5   ").unwrap();
        assert_eq!(c.comparand, Comparand::Value(-2.5));
    }

    #[test]
    fn render_round_trips() {
        for text in [
            "RSI(14) < 30",
            "SMA(5) CROSS_ABOVE SMA(20) weight=2 required",
            r#"RSI(14) BETWEEN [40, 60] label="neutral" OR"#,
        ] {
            let c = parse_condition(text).unwrap();
            assert_eq!(parse_condition(&render_condition(&c)).unwrap(), c, "{}", text);
        }
    }

    #[test]
    fn error_unknown_indicator() {
        let err = parse_condition("ATR(14) > 1").unwrap_err();
        assert!(err.message.contains("expected indicator"));
        assert_eq!(err.position, 0);
    }

    #[test]
    fn error_missing_operator() {
        let err = parse_condition("RSI(14) 30").unwrap_err();
        assert!(err.message.contains("expected operator"));
        assert_eq!(err.position, 8);
    }

    #[test]
    fn error_between_without_range() {
        let err = parse_condition("RSI(14) BETWEEN 40").unwrap_err();
        assert!(err.message.contains("expected '['"));
    }

    #[test]
    fn error_inverted_range() {
        let err = parse_condition("RSI(14) BETWEEN [60, 40]").unwrap_err();
        assert!(err.message.contains("exceeds"));
    }

    #[test]
    fn error_range_without_between() {
        let err = parse_condition("RSI(14) > [1, 2]").unwrap_err();
        assert!(err.message.contains("only valid with BETWEEN"));
    }

    #[test]
    fn error_zero_weight_and_window() {
        assert!(parse_condition("RSI(14) < 30 weight=0").is_err());
        let err = parse_condition("SMA(0) > 1").unwrap_err();
        assert!(err.message.contains("positive"));
    }

    #[test]
    fn error_trailing_input() {
        let err = parse_condition("RSI(14) < 30 garbage").unwrap_err();
        assert!(err.message.contains("unexpected input"));
        let err = parse_condition("RSI(14) < 30 AND extra").unwrap_err();
        assert!(err.message.contains("after relation"));
    }

    #[test]
    fn error_unterminated_label() {
        let err = parse_condition(r#"CLOSE > 1 label="open"#).unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn error_display_with_context() {
        let input = "SMA(20) >> 3";
        let err = parse_condition(input).unwrap_err();
        let ctx = err.display_with_context(input);
        assert!(ctx.contains("^"));
        assert!(ctx.contains("position"));
    }

    #[test]
    fn keywords_are_case_sensitive() {
        let err = parse_condition("rsi(14) < 30").unwrap_err();
        assert!(err.message.contains("expected indicator"));
    }
}
