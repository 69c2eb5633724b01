use regex::{Regex, RegexBuilder};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ComplexityTier {
    Simple,
    Moderate,
    Complex,
    #[serde(rename = "Very Complex")]
    VeryComplex,
}

impl ComplexityTier {
    /// Step function over the weighted structural score.
    pub fn from_score(score: f64) -> Self {
        if score > 50.0 {
            ComplexityTier::VeryComplex
        } else if score > 30.0 {
            ComplexityTier::Complex
        } else if score > 10.0 {
            ComplexityTier::Moderate
        } else {
            ComplexityTier::Simple
        }
    }
}

/// Structural snapshot of one source blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContractMetrics {
    pub line_count: usize,
    pub function_count: usize,
    pub state_variables: usize,
    pub public_functions: usize,
    pub internal_functions: usize,
    pub external_calls: Vec<String>,
    pub imported_libraries: Vec<String>,
    pub estimated_complexity: ComplexityTier,
    pub uses_open_zeppelin: bool,
    pub has_events: bool,
    pub has_modifiers: bool,
    pub inheritance_depth: usize,
}

impl ContractMetrics {
    pub fn complexity_score(&self) -> f64 {
        (self.function_count + self.state_variables + self.inheritance_depth * 2) as f64
            + self.external_calls.len() as f64 / 2.0
    }
}

struct Patterns {
    function: Regex,
    constructor: Regex,
    state_variable: Regex,
    public_function: Regex,
    internal_function: Regex,
    call: Regex,
    import: Regex,
    inheritance: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        function: Regex::new(r"function\s+\w+\s*\(").expect("valid regex"),
        constructor: Regex::new(r"constructor\s*\(").expect("valid regex"),
        state_variable: Regex::new(
            r"(?m)^[ \t]+(?:u?int\d*|bool|address|bytes\d*|string|mapping)\b\s*(?:\([^;\n]*?\))?\s+\w+",
        )
        .expect("valid regex"),
        public_function: Regex::new(r"function\s+\w+.*\spublic").expect("valid regex"),
        internal_function: Regex::new(r"function\s+\w+.*\sinternal").expect("valid regex"),
        call: Regex::new(r"(\w+\.\w+)\s*\(").expect("valid regex"),
        import: Regex::new(r#"import\s+(?:[^;"']*?\bfrom\s+)?["']([^"']+)["']"#)
            .expect("valid regex"),
        inheritance: Regex::new(r"\bis\s+\w+(?:\s*,\s*\w+)*").expect("valid regex"),
    })
}

/// Extract structural metrics from contract source. Never fails: a missing
/// pattern simply yields zero or an empty list.
pub fn extract_metrics(source: &str) -> ContractMetrics {
    let p = patterns();

    let line_count = source.split('\n').count();
    let function_count =
        p.function.find_iter(source).count() + p.constructor.find_iter(source).count();
    let state_variables = p.state_variable.find_iter(source).count();
    let public_functions = p.public_function.find_iter(source).count();
    let internal_functions = p.internal_function.find_iter(source).count();

    let mut external_calls: Vec<String> = Vec::new();
    for cap in p.call.captures_iter(source) {
        let call = cap[1].to_string();
        if !external_calls.contains(&call) {
            external_calls.push(call);
        }
    }

    let imported_libraries: Vec<String> = p
        .import
        .captures_iter(source)
        .map(|cap| cap[1].to_string())
        .collect();

    let uses_open_zeppelin = source.contains("@openzeppelin")
        || source.contains("OpenZeppelin")
        || imported_libraries
            .iter()
            .any(|lib| lib.to_lowercase().contains("openzeppelin"));

    let has_events = source.contains("event ") && source.contains("emit ");
    let has_modifiers = source.contains("modifier ");

    let inheritance_depth = p
        .inheritance
        .find_iter(source)
        .map(|m| m.as_str().split(',').count())
        .max()
        .unwrap_or(0);

    let mut metrics = ContractMetrics {
        line_count,
        function_count,
        state_variables,
        public_functions,
        internal_functions,
        external_calls,
        imported_libraries,
        estimated_complexity: ComplexityTier::Simple,
        uses_open_zeppelin,
        has_events,
        has_modifiers,
        inheritance_depth,
    };
    metrics.estimated_complexity = ComplexityTier::from_score(metrics.complexity_score());
    metrics
}

const LIBRARY_PATTERNS: &[(&str, &str)] = &[
    ("OpenZeppelin", r"@openzeppelin|from.*openzeppelin"),
    ("Uniswap", r"uniswap|IUniswapV"),
    ("Aave", r"aave|ILendingPool"),
    ("Curve", r"curve|ICurvePool"),
    ("Balancer", r"balancer|IVault"),
    ("Compound", r"compound|cToken"),
    ("MakerDAO", r"maker|Dai"),
    ("Yearn", r"yearn|IVault"),
    ("Lido", r"lido|stETH"),
    ("Chainlink", r"chainlink|AggregatorV"),
    ("SafeMath", r"SafeMath"),
    ("ERC20", r"ERC20"),
    ("ERC721", r"ERC721"),
    ("ERC1155", r"ERC1155"),
    ("Ownable", r"Ownable"),
    ("AccessControl", r"AccessControl"),
    ("ReentrancyGuard", r"ReentrancyGuard"),
];

fn library_patterns() -> &'static [(&'static str, Regex)] {
    static COMPILED: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        LIBRARY_PATTERNS
            .iter()
            .map(|(label, pattern)| {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .expect("valid regex");
                (*label, regex)
            })
            .collect()
    })
}

/// Labels of every known framework whose marker appears anywhere in the text,
/// in table order.
pub fn detect_libraries(source: &str) -> Vec<String> {
    library_patterns()
        .iter()
        .filter(|(_, regex)| regex.is_match(source))
        .map(|(label, _)| label.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    const TOKEN: &str = r#"// SPDX-License-Identifier: MIT
pragma solidity ^0.8.20;

import "@openzeppelin/contracts/token/ERC20/ERC20.sol";
import {Ownable} from "@openzeppelin/contracts/access/Ownable.sol";

contract Token is ERC20, Ownable {
    uint256 public cap;
    mapping(address => bool) public blocked;

    event Capped(uint256 cap);

    modifier notBlocked() {
        require(!blocked[msg.sender], "blocked");
        _;
    }

    constructor(uint256 cap_) ERC20("Token", "TKN") Ownable(msg.sender) {
        cap = cap_;
        emit Capped(cap_);
    }

    function mint(address to, uint256 amount) external onlyOwner {
        _mint(to, amount);
    }

    function sweep(address token) public onlyOwner {
        IERC20(token).transfer(owner(), IERC20(token).balanceOf(address(this)));
    }

    function _check(uint256 amount) internal view returns (bool) {
        return totalSupply() + amount <= cap;
    }
}"#;

    #[test]
    fn test_extract_metrics_counts_structure() {
        let metrics = extract_metrics(TOKEN);

        assert_eq!(metrics.line_count, TOKEN.matches('\n').count() + 1);
        assert_eq!(metrics.function_count, 4);
        assert_eq!(metrics.state_variables, 2);
        assert_eq!(metrics.public_functions, 1);
        assert_eq!(metrics.internal_functions, 1);
        assert_eq!(
            metrics.imported_libraries,
            vec![
                "@openzeppelin/contracts/token/ERC20/ERC20.sol".to_string(),
                "@openzeppelin/contracts/access/Ownable.sol".to_string(),
            ]
        );
        assert!(metrics.uses_open_zeppelin);
        assert!(metrics.has_events);
        assert!(metrics.has_modifiers);
        assert_eq!(metrics.inheritance_depth, 2);
    }

    #[test]
    fn test_external_calls_are_distinct() {
        let source = "a.b(); a.b(); c.d (1); a.b();";
        let metrics = extract_metrics(source);
        assert_eq!(metrics.external_calls, vec!["a.b".to_string(), "c.d".to_string()]);
    }

    #[test]
    fn test_empty_source_is_total() {
        let metrics = extract_metrics("");
        assert_eq!(metrics.line_count, 1);
        assert_eq!(metrics.function_count, 0);
        assert_eq!(metrics.inheritance_depth, 0);
        assert!(metrics.external_calls.is_empty());
        assert_eq!(metrics.estimated_complexity, ComplexityTier::Simple);
    }

    #[test]
    fn test_complexity_is_deterministic() {
        let first = extract_metrics(TOKEN);
        let second = extract_metrics(TOKEN);
        assert_eq!(first, second);
        assert_eq!(
            first.estimated_complexity,
            ComplexityTier::from_score(first.complexity_score())
        );
    }

    #[test]
    fn test_complexity_tier_boundaries() {
        assert_eq!(ComplexityTier::from_score(10.0), ComplexityTier::Simple);
        assert_eq!(ComplexityTier::from_score(10.5), ComplexityTier::Moderate);
        assert_eq!(ComplexityTier::from_score(30.0), ComplexityTier::Moderate);
        assert_eq!(ComplexityTier::from_score(50.0), ComplexityTier::Complex);
        assert_eq!(ComplexityTier::from_score(50.5), ComplexityTier::VeryComplex);
    }

    #[test]
    fn test_many_functions_raise_tier() {
        let source: String = (0..40)
            .map(|i| format!("function f{}() public {{}}\n", i))
            .collect();
        assert_eq!(
            extract_metrics(&source).estimated_complexity,
            ComplexityTier::Complex
        );
    }

    #[test]
    fn test_detect_libraries_case_insensitive_and_unique() {
        let libs = detect_libraries("import '@OpenZeppelin/x'; contract X is ownable, ownable {}");
        assert_eq!(libs, vec!["OpenZeppelin".to_string(), "Ownable".to_string()]);
    }

    #[test]
    fn test_detect_libraries_order_independent() {
        let a = "uses Chainlink AggregatorV3;";
        let b = "guarded by ReentrancyGuard;";
        let forward: BTreeSet<String> =
            detect_libraries(&format!("{}\n{}", a, b)).into_iter().collect();
        let backward: BTreeSet<String> =
            detect_libraries(&format!("{}\n{}", b, a)).into_iter().collect();
        assert_eq!(forward, backward);
        assert_eq!(
            detect_libraries(&format!("{}\n{}", a, b)),
            detect_libraries(&format!("{}\n{}", a, b))
        );
    }
}
