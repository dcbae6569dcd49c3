//! Running schedules: iterations of search, apply and rebuild, and the
//! reports they produce.
use std::sync::Arc;

use instant::{Duration, Instant};

use crate::{
    actions::Program,
    gj::CompiledQuery,
    util::{HashMap, HashSet, IndexMap, ListDisplay},
    *,
};

/// Why a schedule stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An iteration did not change the database.
    Saturated,
    /// `saturate` ran the given number of iterations without saturating.
    Exhausted(usize),
    /// The database grew past the node limit.
    NodeLimit(usize),
    /// The `until` facts of a run held.
    Until,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Saturated => write!(f, "saturated"),
            StopReason::Exhausted(n) => write!(f, "exhausted after {n} iterations"),
            StopReason::NodeLimit(n) => write!(f, "node limit {n} reached"),
            StopReason::Until => write!(f, "until condition met"),
        }
    }
}

/// What happened in one iteration of one ruleset.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub ruleset: Symbol,
    pub updated: bool,
    pub num_matches: usize,
    pub num_tuples: usize,
}

/// Running a schedule produces a report of the results.
/// This includes rough timing information and whether
/// the database was updated.
/// Calling `union` on two run reports adds the timing
/// information together.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// If any changes were made to the database, this is
    /// true.
    pub updated: bool,
    pub iterations: usize,
    pub stop_reason: Option<StopReason>,
    /// The time it took to run the query, for each rule.
    pub search_time_per_rule: HashMap<Symbol, Duration>,
    pub apply_time_per_rule: HashMap<Symbol, Duration>,
    pub num_matches_per_rule: HashMap<Symbol, usize>,
    pub num_applies_per_rule: HashMap<Symbol, usize>,
    pub search_time_per_ruleset: HashMap<Symbol, Duration>,
    pub apply_time_per_ruleset: HashMap<Symbol, Duration>,
    pub rebuild_time_per_ruleset: HashMap<Symbol, Duration>,
    pub iteration_reports: Vec<IterationReport>,
}

impl RunReport {
    /// add a ... and a maximum size to the name
    /// for printing, since they may be the rule itself
    fn truncate_rule_name(sym: Symbol) -> String {
        let mut s = sym.to_string().replace('\n', " ");
        if s.len() > 80 {
            let mut end = 80;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            s.truncate(end);
            s.push_str("...");
        }
        s
    }

    fn add_time(times: &mut HashMap<Symbol, Duration>, key: Symbol, time: Duration) {
        *times.entry(key).or_default() += time;
    }

    fn add_count(counts: &mut HashMap<Symbol, usize>, key: Symbol, n: usize) {
        *counts.entry(key).or_default() += n;
    }

    fn union_times(times: &mut HashMap<Symbol, Duration>, other: &HashMap<Symbol, Duration>) {
        for (k, v) in other {
            Self::add_time(times, *k, *v);
        }
    }

    fn union_counts(counts: &mut HashMap<Symbol, usize>, other: &HashMap<Symbol, usize>) {
        for (k, v) in other {
            Self::add_count(counts, *k, *v);
        }
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut res = self.clone();
        res.updated |= other.updated;
        res.iterations += other.iterations;
        res.stop_reason = other.stop_reason.or(self.stop_reason);
        Self::union_times(&mut res.search_time_per_rule, &other.search_time_per_rule);
        Self::union_times(&mut res.apply_time_per_rule, &other.apply_time_per_rule);
        Self::union_counts(&mut res.num_matches_per_rule, &other.num_matches_per_rule);
        Self::union_counts(&mut res.num_applies_per_rule, &other.num_applies_per_rule);
        Self::union_times(&mut res.search_time_per_ruleset, &other.search_time_per_ruleset);
        Self::union_times(&mut res.apply_time_per_ruleset, &other.apply_time_per_ruleset);
        Self::union_times(
            &mut res.rebuild_time_per_ruleset,
            &other.rebuild_time_per_ruleset,
        );
        res.iteration_reports
            .extend(other.iteration_reports.iter().cloned());
        res
    }

    /// Whether enclosing schedules should stop running.
    fn halted(&self) -> bool {
        matches!(self.stop_reason, Some(StopReason::NodeLimit(_)))
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let time_of = |times: &HashMap<Symbol, Duration>, key: &Symbol| {
            times.get(key).copied().unwrap_or_default()
        };

        let all_rules = self
            .search_time_per_rule
            .keys()
            .chain(self.apply_time_per_rule.keys())
            .collect::<HashSet<_>>();
        let mut all_rules_vec = all_rules.into_iter().copied().collect::<Vec<_>>();
        // slowest rules last
        all_rules_vec.sort_by_key(|rule| {
            time_of(&self.search_time_per_rule, rule) + time_of(&self.apply_time_per_rule, rule)
        });

        for rule in all_rules_vec {
            let truncated = Self::truncate_rule_name(rule);
            let search_time = time_of(&self.search_time_per_rule, &rule).as_secs_f64();
            let apply_time = time_of(&self.apply_time_per_rule, &rule).as_secs_f64();
            let num_matches = self.num_matches_per_rule.get(&rule).copied().unwrap_or(0);
            writeln!(
                f,
                "Rule {truncated}: search {search_time:.3}s, apply {apply_time:.3}s, num matches {num_matches}",
            )?;
        }

        let mut rulesets = self
            .search_time_per_ruleset
            .keys()
            .chain(self.apply_time_per_ruleset.keys())
            .chain(self.rebuild_time_per_ruleset.keys())
            .copied()
            .collect::<Vec<_>>();
        rulesets.sort_by_key(|name| name.as_str());
        rulesets.dedup();

        for ruleset in rulesets {
            let search_time = time_of(&self.search_time_per_ruleset, &ruleset).as_secs_f64();
            let apply_time = time_of(&self.apply_time_per_ruleset, &ruleset).as_secs_f64();
            let rebuild_time = time_of(&self.rebuild_time_per_ruleset, &ruleset).as_secs_f64();
            writeln!(
                f,
                "Ruleset {ruleset}: search {search_time:.3}s, apply {apply_time:.3}s, rebuild {rebuild_time:.3}s",
            )?;
        }

        write!(f, "{} iterations", self.iterations)?;
        if let Some(reason) = self.stop_reason {
            write!(f, ", {reason}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub(crate) struct CompiledRule {
    pub(crate) query: CompiledQuery,
    pub(crate) program: Program,
    /// The body equates distinct literals.
    pub(crate) unsat: bool,
}

#[derive(Clone, Debug)]
pub(crate) enum Ruleset {
    Rules(IndexMap<Symbol, Arc<CompiledRule>>),
    Combined(Vec<Symbol>),
}

/// The matches of one rule in one iteration, flattened: every
/// `query.vars.len()` values form one substitution.
struct SearchResult {
    rule: Arc<CompiledRule>,
    all_matches: Vec<Value>,
    num_matches: usize,
    /// Whether the search stopped at the match limit.
    truncated: bool,
}

impl EGraph {
    pub fn run_schedule(&mut self, sched: &Schedule) -> Result<RunReport, Error> {
        match sched {
            Schedule::Run(config) => self.run_rules(config),
            Schedule::Repeat(limit, sched) => {
                let mut report = RunReport::default();
                for _i in 0..*limit {
                    let rec = self.run_schedule(sched)?;
                    report = report.union(&rec);
                    if !rec.updated || rec.halted() {
                        break;
                    }
                }
                Ok(report)
            }
            Schedule::Saturate(sched) => {
                let mut report = RunReport::default();
                let mut rounds = 0;
                loop {
                    if rounds >= self.iteration_limit {
                        log::warn!("Saturation stopped after {rounds} iterations");
                        report.stop_reason = Some(StopReason::Exhausted(rounds));
                        break;
                    }
                    let rec = self.run_schedule(sched)?;
                    rounds += 1;
                    report = report.union(&rec);
                    if rec.halted() {
                        break;
                    }
                    if !rec.updated {
                        if rec.stop_reason.is_none() {
                            report.stop_reason = Some(StopReason::Saturated);
                        }
                        break;
                    }
                }
                Ok(report)
            }
            Schedule::Sequence(scheds) => {
                let mut report = RunReport::default();
                for sched in scheds {
                    report = report.union(&self.run_schedule(sched)?);
                    if report.halted() {
                        break;
                    }
                }
                Ok(report)
            }
        }
    }

    /// One iteration of a ruleset.
    fn run_rules(&mut self, config: &RunConfig) -> Result<RunReport, Error> {
        let mut report: RunReport = Default::default();
        let RunConfig { ruleset, until } = config;
        if !self.rulesets.contains_key(ruleset) {
            return Err(Error::NoSuchRuleset(*ruleset));
        }

        // first rebuild
        let rebuild_start = Instant::now();
        let updates = self.rebuild()?;
        log::debug!("database size: {}", self.num_tuples());
        log::debug!("Made {updates} updates");
        report.add_ruleset_rebuild_time(*ruleset, rebuild_start.elapsed());
        self.timestamp += 1;

        if let Some(facts) = until {
            if self.check_facts(facts).is_ok() {
                log::info!(
                    "Breaking early because of facts:\n {}!",
                    ListDisplay(facts, "\n")
                );
                report.stop_reason = Some(StopReason::Until);
                return Ok(report);
            }
        }

        let subreport = self.step_rules(*ruleset)?;
        report = report.union(&subreport);

        log::debug!("database size: {}", self.num_tuples());
        self.timestamp += 1;

        if self.num_tuples() > self.node_limit {
            log::warn!("Node limit reached, {} nodes. Stopping!", self.num_tuples());
            report.stop_reason = Some(StopReason::NodeLimit(self.node_limit));
        }

        report.iterations += 1;
        report.iteration_reports.push(IterationReport {
            ruleset: *ruleset,
            updated: report.updated,
            num_matches: report.num_matches_per_rule.values().sum(),
            num_tuples: self.num_tuples(),
        });
        Ok(report)
    }

    fn step_rules(&mut self, ruleset: Symbol) -> Result<RunReport, Error> {
        let n_unions_before = self.unionfind.n_unions();
        let mut run_report = RunReport::default();
        let mut search_results = IndexMap::<Symbol, SearchResult>::default();
        self.search_rules(ruleset, &mut run_report, &mut search_results)?;
        self.apply_rules(&mut run_report, search_results)?;
        run_report.updated |=
            self.did_change_tables() || n_unions_before != self.unionfind.n_unions();

        Ok(run_report)
    }

    /// Search all the rules in a ruleset.
    /// Add the search results for a rule to search_results, a map indexed by rule name.
    fn search_rules(
        &self,
        ruleset: Symbol,
        run_report: &mut RunReport,
        search_results: &mut IndexMap<Symbol, SearchResult>,
    ) -> Result<(), Error> {
        let rules = self
            .rulesets
            .get(&ruleset)
            .ok_or(Error::NoSuchRuleset(ruleset))?;
        let search_start = Instant::now();
        match rules {
            Ruleset::Rules(rules) => {
                for (rule_name, rule) in rules.iter() {
                    if search_results.contains_key(rule_name) {
                        continue;
                    }
                    let mut all_matches = vec![];
                    let mut num_matches = 0;
                    let mut truncated = false;
                    let rule_search_start = Instant::now();
                    if !rule.unsat {
                        let timestamp = if self.seminaive {
                            self.rule_last_run_timestamp
                                .get(rule_name)
                                .copied()
                                .unwrap_or(0)
                        } else {
                            0
                        };
                        self.run_query(&rule.query, timestamp, false, |values| {
                            debug_assert_eq!(values.len(), rule.query.vars.len());
                            if num_matches >= self.match_limit {
                                truncated = true;
                                return Err(());
                            }
                            num_matches += 1;
                            all_matches.extend_from_slice(values);
                            Ok(())
                        });
                    }
                    let rule_search_time = rule_search_start.elapsed();
                    log::trace!(
                        "Searched for {rule_name} in {:.3}s ({num_matches} results)",
                        rule_search_time.as_secs_f64(),
                    );
                    if truncated {
                        log::debug!("Rule {rule_name} hit the match limit of {}", self.match_limit);
                    }
                    run_report.add_rule_search_time(*rule_name, rule_search_time);
                    search_results.insert(
                        *rule_name,
                        SearchResult {
                            rule: rule.clone(),
                            all_matches,
                            num_matches,
                            truncated,
                        },
                    );
                }
            }
            Ruleset::Combined(sub_rulesets) => {
                for sub_ruleset in sub_rulesets {
                    self.search_rules(*sub_ruleset, run_report, search_results)?;
                }
            }
        }
        run_report.add_ruleset_search_time(ruleset, search_start.elapsed());
        Ok(())
    }

    fn apply_rules(
        &mut self,
        run_report: &mut RunReport,
        search_results: IndexMap<Symbol, SearchResult>,
    ) -> Result<(), Error> {
        let apply_start = Instant::now();
        let stack = &mut vec![];
        for (rule_name, result) in search_results {
            let SearchResult {
                rule,
                all_matches,
                num_matches,
                truncated,
            } = result;
            run_report.add_rule_num_matches(rule_name, num_matches);

            // a truncated search has to see the same rows again next time
            if !truncated {
                self.rule_last_run_timestamp
                    .insert(rule_name, self.timestamp);
            }
            let rule_apply_start = Instant::now();

            let num_vars = rule.query.vars.len();
            if num_vars == 0 {
                // a query without variables can still fail to match
                if num_matches > 0 {
                    stack.clear();
                    self.run_actions(stack, &[], &rule.program)?;
                    run_report.add_rule_num_applies(rule_name, 1);
                }
            } else {
                for values in all_matches.chunks(num_vars) {
                    stack.clear();
                    self.run_actions(stack, values, &rule.program)?;
                }
                run_report.add_rule_num_applies(rule_name, num_matches);
            }

            run_report.add_rule_apply_time(rule_name, rule_apply_start.elapsed());
        }
        let apply_time = apply_start.elapsed();
        for ruleset in run_report.search_time_per_ruleset.keys().copied().collect::<Vec<_>>() {
            RunReport::add_time(&mut run_report.apply_time_per_ruleset, ruleset, apply_time);
        }
        Ok(())
    }

    fn did_change_tables(&self) -> bool {
        self.functions
            .values()
            .any(|function| function.nodes.max_ts() >= self.timestamp)
    }
}

impl RunReport {
    fn add_rule_search_time(&mut self, rule: Symbol, time: Duration) {
        Self::add_time(&mut self.search_time_per_rule, rule, time);
    }

    fn add_ruleset_search_time(&mut self, ruleset: Symbol, time: Duration) {
        Self::add_time(&mut self.search_time_per_ruleset, ruleset, time);
    }

    fn add_rule_apply_time(&mut self, rule: Symbol, time: Duration) {
        Self::add_time(&mut self.apply_time_per_rule, rule, time);
    }

    fn add_ruleset_rebuild_time(&mut self, ruleset: Symbol, time: Duration) {
        Self::add_time(&mut self.rebuild_time_per_ruleset, ruleset, time);
    }

    fn add_rule_num_matches(&mut self, rule: Symbol, num_matches: usize) {
        Self::add_count(&mut self.num_matches_per_rule, rule, num_matches);
    }

    fn add_rule_num_applies(&mut self, rule: Symbol, num_applies: usize) {
        Self::add_count(&mut self.num_applies_per_rule, rule, num_applies);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_union_counts_and_keep_the_last_stop_reason() {
        let rule = Symbol::from("r");
        let mut a = RunReport {
            iterations: 2,
            stop_reason: Some(StopReason::Saturated),
            ..Default::default()
        };
        a.add_rule_num_matches(rule, 3);
        let mut b = RunReport {
            updated: true,
            iterations: 1,
            ..Default::default()
        };
        b.add_rule_num_matches(rule, 4);

        let c = a.union(&b);
        assert!(c.updated);
        assert_eq!(c.iterations, 3);
        assert_eq!(c.num_matches_per_rule[&rule], 7);
        assert_eq!(c.stop_reason, Some(StopReason::Saturated));
    }

    #[test]
    fn long_rule_names_are_truncated() {
        let name = Symbol::from("x".repeat(100).as_str());
        let truncated = RunReport::truncate_rule_name(name);
        assert_eq!(truncated.len(), 83);
        assert!(truncated.ends_with("..."));
    }
}
