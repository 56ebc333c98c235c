//! Prompt templates for the two structured predictions made per claim.

use crate::PromptTemplate;

const GENERATE_POLICY_QUERIES: &str = "\
You are an assistant helping an insurance adjuster decide which parts of an auto insurance \
policy apply to a claim.

Claim information:
{claim_info}

Write 3 to 5 short, specific search queries that would find the policy sections needed to \
decide this claim: the coverage that applies to the described loss, relevant exclusions, \
limits, and the deductible.";

const POLICY_RECOMMENDATION: &str = "\
You are an insurance claims adjuster. Decide how the policy applies to the claim below, \
using only the policy text provided.

Claim information:
{claim_info}

Policy text:
{policy_text}

Identify the policy section that governs the loss, state in one or two sentences whether the \
loss is covered and why, give the deductible that applies, and recommend a settlement amount \
(the covered loss minus the deductible, never more than the requested amount). Leave the \
deductible or settlement out if the policy text does not support a figure.";

pub fn policy_queries() -> PromptTemplate {
    PromptTemplate::new(GENERATE_POLICY_QUERIES)
}

pub fn policy_recommendation() -> PromptTemplate {
    PromptTemplate::new(POLICY_RECOMMENDATION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_prompt_variables() {
        assert_eq!(policy_queries().variables(), vec!["claim_info"]);
    }

    #[test]
    fn recommendation_prompt_variables() {
        assert_eq!(
            policy_recommendation().variables(),
            vec!["claim_info", "policy_text"]
        );
    }
}
