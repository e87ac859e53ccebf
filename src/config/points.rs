// src/config/points.rs
//! Catalog of analysis dimensions and their detection points. Each point
//! carries the question the LLM validator is asked to answer; the
//! dimension label prefixes the vector-search query.

pub struct PointSpec {
    pub name: &'static str,
    pub description: &'static str,
}

pub struct DimensionSpec {
    pub category: &'static str,
    /// Human-readable label, used in vector-search queries.
    pub label: &'static str,
    pub points: &'static [PointSpec],
}

pub static DIMENSIONS: &[DimensionSpec] = &[
    DimensionSpec {
        category: "icebreak",
        label: "破冰",
        points: &[
            PointSpec {
                name: "professional_identity",
                description: "销售是否表明了专业身份（如益盟操盘手专员、老师、顾问等）",
            },
            PointSpec {
                name: "value_help",
                description: "销售是否说明了能帮助客户解决问题或带来收益",
            },
            PointSpec {
                name: "time_notice",
                description: "销售是否告知了沟通需要的时间（如耽误您几分钟）",
            },
            PointSpec {
                name: "company_background",
                description: "销售是否提及了公司背景或背书（如腾讯投资的上市公司）",
            },
            PointSpec {
                name: "free_teach",
                description: "销售是否说明了免费服务或免费讲解",
            },
        ],
    },
    DimensionSpec {
        category: "deduction",
        label: "功能演绎",
        points: &[
            PointSpec {
                name: "bs_explained",
                description: "销售是否讲解了买卖点、操盘线、B点S点、趋势信号等内容",
            },
            PointSpec {
                name: "period_resonance_explained",
                description: "销售是否讲到了周期共振、不同时间级别的行情分析",
            },
            PointSpec {
                name: "control_funds_explained",
                description: "销售是否提及了主力资金、控盘资金、筹码分布等内容",
            },
            PointSpec {
                name: "bubugao_explained",
                description: "销售是否讲到了步步高功能、VIP专属指标等内容",
            },
            PointSpec {
                name: "value_quantify_explained",
                description: "销售是否将功能结合真实案例或量化价值进行演绎",
            },
            PointSpec {
                name: "customer_stock_explained",
                description: "销售是否分析或演绎了客户提及的具体股票",
            },
        ],
    },
];

pub fn dimension(category: &str) -> Option<&'static DimensionSpec> {
    DIMENSIONS.iter().find(|d| d.category == category)
}

pub fn point_description(category: &str, point: &str) -> Option<&'static str> {
    dimension(category)?
        .points
        .iter()
        .find(|p| p.name == point)
        .map(|p| p.description)
}
