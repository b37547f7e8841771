use std::collections::BTreeMap;

use crate::tokenizer::TokenService;

use super::parser::{Element, ElementParser};

/// Flat budget selection; used for string pseudo-selections and simple
/// element lists.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub kept: Vec<Element>,
    pub removed: Vec<Element>,
    pub total: usize,
    pub tokens_kept: usize,
    pub tokens_removed: usize,
}

impl Selection {
    pub fn has_removals(&self) -> bool {
        !self.removed.is_empty()
    }
}

/// Depth-first, budget-threading selection over nested collections.
///
/// Invariant: total tokens removed at a subtree = this level's removals +
/// the sum over `nested` selections.
#[derive(Debug, Clone, Default)]
pub struct DfsSelection {
    pub kept: Vec<Element>,
    pub removed: Vec<Element>,
    pub total: usize,
    pub tokens_kept: usize,
    pub tokens_removed: usize,
    /// Index into `kept` → selection for that element's nested content.
    pub nested: BTreeMap<usize, DfsSelection>,
    pub remaining_budget: usize,
    pub budget_exhausted: bool,
}

impl DfsSelection {
    pub fn has_removals(&self) -> bool {
        !self.removed.is_empty() || self.nested.values().any(|n| n.has_removals())
    }

    pub fn total_tokens_removed(&self) -> usize {
        self.tokens_removed
            + self
                .nested
                .values()
                .map(|n| n.total_tokens_removed())
                .sum::<usize>()
    }

    pub fn total_removed_count(&self) -> usize {
        self.removed.len()
            + self
                .nested
                .values()
                .map(|n| n.total_removed_count())
                .sum::<usize>()
    }
}

pub struct BudgetSelector<'a> {
    tokenizer: &'a TokenService,
}

impl<'a> BudgetSelector<'a> {
    pub fn new(tokenizer: &'a TokenService) -> Self {
        Self { tokenizer }
    }

    /// Keep leading elements while they fit; `min_keep` forces the head even
    /// when over budget.
    pub fn select_first(&self, elements: Vec<Element>, budget: usize, min_keep: usize) -> Selection {
        let total = elements.len();
        let mut kept = Vec::new();
        let mut removed = Vec::new();
        let mut tokens_used = 0usize;

        for elem in elements {
            let cost = self.tokenizer.count(&elem.text);
            if tokens_used + cost <= budget || kept.len() < min_keep {
                tokens_used += cost;
                kept.push(elem);
            } else {
                removed.push(elem);
            }
        }

        let tokens_removed = removed.iter().map(|e| self.tokenizer.count(&e.text)).sum();
        Selection {
            kept,
            removed,
            total,
            tokens_kept: tokens_used,
            tokens_removed,
        }
    }

    /// Token overhead of the literal scaffolding around kept content.
    pub fn calculate_overhead(
        &self,
        opening: &str,
        closing: &str,
        placeholder: &str,
        is_multiline: bool,
        indent: &str,
    ) -> usize {
        let text = if is_multiline {
            format!("{opening}\n{indent}{placeholder}\n{indent}{closing}")
        } else {
            format!("{opening}{placeholder}{closing}")
        };
        self.tokenizer.count(&text)
    }

    /// Greedy DFS with cascading finalization: descend into each kept
    /// element's nested structure with the remaining budget; the child's
    /// leftover threads back to this level; exhaustion anywhere stops every
    /// level above.
    pub fn select_dfs(
        &self,
        elements: Vec<Element>,
        budget: usize,
        parser: &ElementParser,
        min_keep: usize,
    ) -> DfsSelection {
        let total = elements.len();
        if total == 0 {
            return DfsSelection {
                remaining_budget: budget,
                ..DfsSelection::default()
            };
        }

        let mut kept: Vec<Element> = Vec::new();
        let mut removed: Vec<Element> = Vec::new();
        let mut nested: BTreeMap<usize, DfsSelection> = BTreeMap::new();
        let mut tokens_used = 0usize;
        let mut remaining_budget = budget;
        let mut budget_exhausted = false;

        let mut iter = elements.into_iter();
        while let Some(elem) = iter.next() {
            let cost = self.tokenizer.count(&elem.text);
            let can_afford = tokens_used + cost <= remaining_budget;
            let must_keep = kept.len() < min_keep;

            if can_afford || must_keep {
                tokens_used += cost;
                remaining_budget = remaining_budget.saturating_sub(cost);

                let nested_content = elem.nested.as_ref().map(|n| n.content.clone());
                let index = kept.len();
                kept.push(elem);

                if let Some(content) = nested_content {
                    let child =
                        self.select_dfs(parser.parse(&content), remaining_budget, parser, min_keep);
                    remaining_budget = child.remaining_budget;
                    budget_exhausted = child.budget_exhausted;
                    nested.insert(index, child);

                    if budget_exhausted {
                        removed.extend(iter);
                        break;
                    }
                }
            } else {
                budget_exhausted = true;
                removed.push(elem);
                removed.extend(iter);
                break;
            }
        }

        let tokens_removed = removed.iter().map(|e| self.tokenizer.count(&e.text)).sum();

        DfsSelection {
            kept,
            removed,
            total,
            tokens_kept: tokens_used,
            tokens_removed,
            nested,
            remaining_budget,
            budget_exhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::literals::parser::ParseConfig;

    fn svc() -> TokenService {
        TokenService::heuristic("test", 4, 32_000)
    }

    fn elems(parser: &ElementParser, content: &str) -> Vec<Element> {
        parser.parse(content)
    }

    #[test]
    fn select_first_respects_budget_and_min_keep() {
        let tok = svc();
        let sel = BudgetSelector::new(&tok);
        let parser = ElementParser::new(ParseConfig::default());

        // Each element is 8 chars = 2 tokens.
        let es = elems(&parser, "aaaaaaaa, bbbbbbbb, cccccccc");
        let s = sel.select_first(es.clone(), 4, 1);
        assert_eq!(s.kept.len(), 2);
        assert_eq!(s.removed.len(), 1);

        // Budget 0 still keeps min_keep.
        let s = sel.select_first(es, 0, 1);
        assert_eq!(s.kept.len(), 1);
        assert!(s.has_removals());
    }

    #[test]
    fn dfs_threads_budget_through_nested_levels() {
        let tok = svc();
        let sel = BudgetSelector::new(&tok);
        let parser = ElementParser::new(ParseConfig::default());

        let es = elems(&parser, "[aaaaaaaa, bbbbbbbb, cccccccc], dddddddd");
        // Outer element is nested; budget only covers part of the inner list.
        let s = sel.select_dfs(es, 6, &parser, 1);
        assert_eq!(s.kept.len(), 1);
        let child = s.nested.get(&0).unwrap();
        assert!(child.budget_exhausted);
        assert!(child.has_removals());
        // Exhaustion cascades: the outer sibling is finalized as removed.
        assert!(s.budget_exhausted);
        assert_eq!(s.removed.len(), 1);
        assert_eq!(s.removed[0].text, "dddddddd");
    }

    #[test]
    fn total_removed_aggregates_nested_levels() {
        let tok = svc();
        let sel = BudgetSelector::new(&tok);
        let parser = ElementParser::new(ParseConfig::default());

        let es = elems(&parser, "[aaaaaaaa, bbbbbbbb], cccccccc");
        let s = sel.select_dfs(es, 5, &parser, 1);
        let direct: usize = s.removed.len();
        let nested: usize = s.nested.values().map(|n| n.total_removed_count()).sum();
        assert_eq!(s.total_removed_count(), direct + nested);
        assert!(s.total_tokens_removed() > 0);
    }

    #[test]
    fn everything_fits_leaves_no_removals() {
        let tok = svc();
        let sel = BudgetSelector::new(&tok);
        let parser = ElementParser::new(ParseConfig::default());

        let es = elems(&parser, "a, b, c");
        let s = sel.select_dfs(es, 100, &parser, 1);
        assert!(!s.has_removals());
        assert!(!s.budget_exhausted);
        assert_eq!(s.kept.len(), 3);
    }
}
