pub mod alphagenome;
