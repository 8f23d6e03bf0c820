pub mod orphans;
